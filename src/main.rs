// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 示例服务
//!
//! 演示框架的主要用法：文本 / JSON / HTML 处理函数、分页列表、带中间件的路由分组、
//! 静态文件目录，以及一个基于标准输入的运维控制台（`stop` / `status` / `help`）。

use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use serde_derive::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    sync::oneshot,
};

use ronweb::{
    logger,
    middleware::{request_id, REQUEST_ID_KEY},
    Config, Context, Engine, Pages, Render, Response, TemplateData,
};

const CONFIG_PATH: &str = "config/development.toml";

#[derive(Serialize)]
struct Message<'a> {
    message: &'a str,
}

#[derive(Debug, Deserialize)]
struct Signup {
    name: String,
    email: String,
    #[serde(default)]
    age: Option<u32>,
}

fn main() {
    // 配置缺失或无法解析时使用默认值继续启动
    let config = match Config::from_toml(CONFIG_PATH) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}，使用默认配置", e);
            Config::new()
        }
    };

    if let Err(e) = logger::init(config.log_level()) {
        eprintln!("{}", e);
    }
    info!("配置文件已载入");

    let runtime = match Builder::new_multi_thread()
        .worker_threads(config.worker_threads())
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("无法创建异步运行时：{}", e);
            return;
        }
    };

    let mut engine = Engine::with_config(config.clone());
    engine.set_render(Render::from_config(&config));
    register_routes(&mut engine);
    if let Err(e) = engine.static_files("/assets", "assets") {
        warn!("{}", e);
    }

    let address = engine.address();
    let active_connections = engine.connection_counter();
    info!("服务端将在{}上监听Socket连接", address);

    runtime.block_on(async move {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        tokio::spawn(console(shutdown_tx, active_connections));

        let shutdown = async {
            let _ = shutdown_rx.await;
        };
        if let Err(e) = engine.run_until(address, shutdown).await {
            error!("服务异常退出：{}", e);
        }
    });
    info!("服务端已停止");
}

fn register_routes(engine: &mut Engine) {
    engine
        .get("/", |ctx: Context| async move { ctx.text(200, "hello world") })
        .get("/json", |ctx: Context| async move {
            ctx.json(200, &Message { message: "hello world" })
        })
        .post("/another", |ctx: Context| async move {
            ctx.text(200, "another hello world")
        })
        .get("/html", |ctx: Context| async move {
            let mut td = TemplateData::new();
            td.insert("title", "hello world")
                .insert("message", "hello world from html");
            ctx.html(200, "page.index.html", Some(&td))
        })
        .get("/component", |ctx: Context| async move {
            ctx.html(200, "component.list.html", None)
        })
        .get("/items", items);

    engine
        .group("/api")
        .use_middleware(request_id())
        .get("/ping", |ctx: Context| async move {
            let id = ctx.value(REQUEST_ID_KEY).unwrap_or_default().to_string();
            ctx.json(200, &serde_json::json!({ "pong": true, "request_id": id }))
        })
        .post("/signup", signup);
}

async fn items(ctx: Context) -> Response {
    let all: Vec<String> = (1..=95).map(|i| format!("Item {}", i)).collect();
    let pages = ctx.pages(Pages::new(all.len() as i64, 10, 1));

    let visible = match pages.paginate(&all) {
        Ok(slice) => slice,
        Err(e) => return Response::from_exception(&e),
    };

    let mut td = TemplateData::new();
    td.insert("title", "Items")
        .insert("items", visible.to_vec())
        .set_pages(pages);
    ctx.html(200, "page.items.html", Some(&td))
}

async fn signup(ctx: Context) -> Response {
    let json = ctx
        .request()
        .content_type()
        .map_or(false, |ct| ct.starts_with("application/json"));
    let result = if json {
        ctx.bind_json::<Signup>()
    } else {
        ctx.bind_form::<Signup>()
    };
    match result {
        Ok(signup) => {
            info!("[ID{}]新用户注册：{:?}", ctx.id(), signup);
            ctx.json(
                201,
                &serde_json::json!({
                    "name": signup.name,
                    "email": signup.email,
                    "age": signup.age,
                }),
            )
        }
        Err(e) => Response::from_exception(&e),
    }
}

/// 运维控制台，运行在后台任务中，不阻塞接受循环
async fn console(shutdown: oneshot::Sender<()>, active_connections: Arc<Mutex<u32>>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shutdown = Some(shutdown);
    while let Ok(Some(input)) = lines.next_line().await {
        match input.trim() {
            "stop" => {
                if let Some(tx) = shutdown.take() {
                    let _ = tx.send(());
                }
                println!("停机指令已激活，服务器将停止接受新连接...");
                break;
            }
            "help" => {
                println!("== ronweb Help ==");
                println!("stop   - 发出停机信号");
                println!("status - 查看当前服务器运行状态");
                println!("help   - 显示此帮助信息");
                println!("=================");
            }
            "status" => {
                let active = match active_connections.lock() {
                    Ok(lock) => *lock,
                    Err(poisoned) => *poisoned.into_inner(),
                };
                println!("== ronweb 状态 ==");
                println!("当前活跃连接数: {}", active);
                println!("=================");
            }
            "" => {}
            cmd => println!("无效的命令：{}", cmd),
        }
    }
}
