// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 服务循环与连接处理
//!
//! 每个 TCP 连接由一个独立的 Tokio 任务处理，且只处理一个请求
//! （响应头固定为 `Connection: close`）。
//!
//! 连接处理流程：读取请求头直到 `\r\n\r\n`，再按 `Content-Length` 读取请求体；
//! 解析失败返回 400，请求体超限返回 413；然后交给 [`Engine::dispatch`]，
//! 按需压缩响应并写回。

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::{debug, error, info, warn};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, ToSocketAddrs},
};

use crate::{
    engine::Engine,
    exception::Exception,
    param::{HttpRequestMethod, HEADER_TERMINATOR, MAX_HEADER_SIZE},
    request::{find_header_end, peek_content_length, Request},
    response::Response,
};

const READ_CHUNK_SIZE: usize = 4096;

impl Engine {
    /// 绑定 `addr` 并一直服务下去
    pub async fn run<A: ToSocketAddrs>(self, addr: A) -> Result<(), Exception> {
        self.run_until(addr, std::future::pending()).await
    }

    /// 绑定 `addr` 并服务，直到 `shutdown` 完成
    pub async fn run_until<A, F>(self, addr: A, shutdown: F) -> Result<(), Exception>
    where
        A: ToSocketAddrs,
        F: Future<Output = ()>,
    {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("无法绑定端口，错误：{}", e);
                return Err(Exception::Io(e));
            }
        };
        if let Ok(local) = listener.local_addr() {
            info!("服务端已在 {} 上监听Socket连接", local);
        }
        self.serve(listener, shutdown).await
    }

    /// 在已绑定的监听器上运行接受循环，`shutdown` 完成后停止接受新连接。
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Exception>
    where
        F: Future<Output = ()>,
    {
        let engine = Arc::new(self);
        let mut id: u128 = 0;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("主循环接收到停机指令，正在退出...");
                    break;
                }
                accepted = listener.accept() => {
                    let (mut stream, addr) = match accepted {
                        Ok(connection) => connection,
                        Err(e) => {
                            error!("接受TCP连接失败：{}", e);
                            continue;
                        }
                    };
                    debug!("[ID{}]TCP连接已建立：{}", id, addr);

                    let engine = Arc::clone(&engine);
                    tokio::spawn(async move {
                        let _guard = ConnectionGuard::new(Arc::clone(&engine.active_connections));
                        handle_connection(engine, &mut stream, id).await;
                    });
                    id += 1;
                }
            }
        }
        Ok(())
    }
}

/// 连接计数：创建时加 1，销毁时减 1
struct ConnectionGuard {
    counter: Arc<Mutex<u32>>,
}

impl ConnectionGuard {
    fn new(counter: Arc<Mutex<u32>>) -> Self {
        adjust(&counter, |n| n.saturating_add(1));
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        adjust(&self.counter, |n| n.saturating_sub(1));
    }
}

fn adjust(counter: &Mutex<u32>, f: impl FnOnce(u32) -> u32) {
    let mut lock = counter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *lock = f(*lock);
}

/// 读取一个完整请求。客户端未发送任何数据就关闭连接时返回 `Ok(None)`。
async fn read_request(
    stream: &mut TcpStream,
    max_body_size: usize,
    id: u128,
) -> Result<Option<Vec<u8>>, Exception> {
    let mut buffer: Vec<u8> = Vec::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    let header_end = loop {
        if let Some(end) = find_header_end(&buffer) {
            break end;
        }
        if buffer.len() > MAX_HEADER_SIZE {
            return Err(Exception::MalformedRequest("request header too large".to_string()));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buffer.is_empty() {
                return Ok(None);
            }
            return Err(Exception::MalformedRequest("incomplete request header".to_string()));
        }
        buffer.extend_from_slice(&chunk[..n]);
    };

    let content_length = peek_content_length(&buffer[..header_end]).unwrap_or(0);
    if content_length > max_body_size {
        warn!("[ID{}]请求体过大：{} bytes，上限 {} bytes", id, content_length, max_body_size);
        return Err(Exception::PayloadTooLarge(content_length));
    }

    let expected = header_end + HEADER_TERMINATOR.len() + content_length;
    while buffer.len() < expected {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            debug!("[ID{}]请求体未读完连接即关闭", id);
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }
    Ok(Some(buffer))
}

/// # 连接处理器
///
/// 负责单个 TCP 流的生命周期：读取解析请求、分发、压缩并发送响应。
async fn handle_connection(engine: Arc<Engine>, stream: &mut TcpStream, id: u128) {
    let max_body_size = engine.config().max_body_size();
    let buffer = match read_request(stream, max_body_size, id).await {
        Ok(Some(buffer)) => buffer,
        Ok(None) => {
            debug!("[ID{}]客户端未发送数据即关闭连接", id);
            return;
        }
        Err(Exception::Io(e)) => {
            error!("[ID{}]读取TCPStream时遇到错误: {}", id, e);
            return;
        }
        Err(e) => {
            write_response(stream, &Response::from_exception(&e), id).await;
            return;
        }
    };
    debug!("[ID{}]HTTP请求接收完毕，{} bytes", id, buffer.len());

    let start_time = Instant::now();

    let request = match Request::try_from(&buffer, id) {
        Ok(request) => request,
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            write_response(stream, &Response::from_exception(&e), id).await;
            return;
        }
    };

    let version = request.version();
    let method = request.method();
    let path = request.path().to_string();
    let user_agent = request.user_agent().to_string();
    let accept_encoding = request.accept_encoding().to_vec();

    let mut response = Arc::clone(&engine).dispatch(request, id).await;
    response.set_version(version);
    if engine.config().compression() && method != HttpRequestMethod::Head {
        response.compress_for(&accept_encoding, id);
    }

    info!(
        "[ID{}] {}, {}, {}, {}, {}, {}, {}ms",
        id,
        version,
        method,
        path,
        response.status_code(),
        response.information(),
        user_agent,
        start_time.elapsed().as_millis(),
    );

    write_response(stream, &response, id).await;
}

async fn write_response(stream: &mut TcpStream, response: &Response, id: u128) {
    let bytes = response.as_bytes();
    debug!("[ID{}]发送响应，长度: {}", id, bytes.len());
    if let Err(e) = stream.write_all(&bytes).await {
        error!("[ID{}]发送响应失败: {}", id, e);
        return;
    }
    let _ = stream.flush().await;
    let _ = stream.shutdown().await;
}
