//! 请求体绑定：JSON 与 urlencoded 表单。

use serde::de::DeserializeOwned;

use crate::{
    exception::Exception,
    param::{HEADER_FORM, HEADER_JSON},
    request::Request,
};

// 比较时忽略 `; charset=...` 等参数
fn media_type(content_type: &str) -> &str {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
}

fn is_media_type(request: &Request, expected: &str) -> bool {
    request
        .content_type()
        .map(|ct| media_type(ct).eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// 把 JSON 请求体反序列化为 `T`，要求 `Content-Type: application/json`。
pub fn bind_json<T: DeserializeOwned>(request: &Request) -> Result<T, Exception> {
    if !is_media_type(request, HEADER_JSON) {
        return Err(Exception::UnsupportedMediaType(
            request.content_type().unwrap_or("none").to_string(),
        ));
    }
    serde_json::from_slice(request.body()).map_err(|e| Exception::Binding(e.to_string()))
}

/// 合并表单请求体与查询字符串并反序列化为 `T`。
///
/// 请求体中的值排在查询字符串之前。`Vec` 字段按顺序接收同名键的全部值；
/// 标量字段收到多个值时取第一个。字段名可用 `#[serde(rename = "...")]` 重命名。
pub fn bind_form<T: DeserializeOwned>(request: &Request) -> Result<T, Exception> {
    let body_pairs: &[(String, String)] = if is_media_type(request, HEADER_FORM) {
        request.form_pairs()
    } else {
        &[]
    };
    let all: Vec<(&str, &str)> = body_pairs
        .iter()
        .chain(request.query_pairs())
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    match decode(&all) {
        Ok(value) => Ok(value),
        Err(e) => {
            // 标量字段不接受多个值，退回到每个键只保留第一个值
            let mut first: Vec<(&str, &str)> = Vec::with_capacity(all.len());
            for &(key, value) in &all {
                if !first.iter().any(|(k, _)| *k == key) {
                    first.push((key, value));
                }
            }
            if first.len() == all.len() {
                return Err(e);
            }
            decode(&first)
        }
    }
}

fn decode<T: DeserializeOwned>(pairs: &[(&str, &str)]) -> Result<T, Exception> {
    let encoded = serde_html_form::to_string(pairs).map_err(|e| Exception::Binding(e.to_string()))?;
    serde_html_form::from_str(&encoded).map_err(|e| Exception::Binding(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use serde_derive::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Signup {
        name: String,
        age: u32,
        #[serde(rename = "accept_terms")]
        accepted: bool,
        #[serde(default)]
        nickname: Option<String>,
    }

    fn request(head: &str, body: &str) -> Request {
        let raw = format!("{}Content-Length: {}\r\n\r\n{}", head, body.len(), body);
        Request::try_from(raw.as_bytes(), 0).unwrap()
    }

    #[test]
    fn test_bind_json() {
        let req = request(
            "POST /signup HTTP/1.1\r\nContent-Type: application/json; charset=utf-8\r\n",
            r#"{"name":"ana","age":31,"accept_terms":true}"#,
        );
        let signup: Signup = bind_json(&req).unwrap();
        assert_eq!(
            signup,
            Signup {
                name: "ana".to_string(),
                age: 31,
                accepted: true,
                nickname: None
            }
        );
    }

    #[test]
    fn test_bind_json_wrong_content_type() {
        let req = request("POST /signup HTTP/1.1\r\nContent-Type: text/plain\r\n", "{}");
        let result: Result<Signup, _> = bind_json(&req);
        assert!(matches!(result, Err(Exception::UnsupportedMediaType(ref ct)) if ct == "text/plain"));
    }

    #[test]
    fn test_bind_json_malformed() {
        let req = request(
            "POST /signup HTTP/1.1\r\nContent-Type: application/json\r\n",
            r#"{"name": "#,
        );
        let result: Result<Signup, _> = bind_json(&req);
        assert!(matches!(result, Err(Exception::Binding(_))));
    }

    #[test]
    fn test_bind_form_body_before_query() {
        let req = request(
            "POST /signup?name=query&nickname=q HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n",
            "name=body+name&age=40&accept_terms=false&age=99",
        );
        let signup: Signup = bind_form(&req).unwrap();
        assert_eq!(signup.name, "body name");
        assert_eq!(signup.age, 40);
        assert!(!signup.accepted);
        assert_eq!(signup.nickname.as_deref(), Some("q"));
    }

    #[test]
    fn test_bind_form_query_only() {
        let req = request("GET /signup?name=ana&age=7&accept_terms=true HTTP/1.1\r\n", "");
        let signup: Signup = bind_form(&req).unwrap();
        assert_eq!(signup.name, "ana");
        assert!(signup.accepted);
    }

    #[test]
    fn test_bind_form_type_error() {
        let req = request("GET /signup?name=ana&age=old&accept_terms=true HTTP/1.1\r\n", "");
        let result: Result<Signup, _> = bind_form(&req);
        assert!(matches!(result, Err(Exception::Binding(_))));
    }

    #[test]
    fn test_bind_form_repeated_keys() {
        #[derive(Debug, Deserialize)]
        struct Post {
            title: String,
            #[serde(default)]
            tags: Vec<String>,
        }
        let req = request(
            "POST /posts?tags=c HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n",
            "title=hello&tags=a&tags=b",
        );
        let post: Post = bind_form(&req).unwrap();
        assert_eq!(post.title, "hello");
        assert_eq!(post.tags, vec!["a", "b", "c"]);

        let req = request("GET /posts?title=one&tags=x HTTP/1.1\r\n", "");
        let post: Post = bind_form(&req).unwrap();
        assert_eq!(post.tags, vec!["x"]);

        let req = request("GET /posts?title=none HTTP/1.1\r\n", "");
        let post: Post = bind_form(&req).unwrap();
        assert!(post.tags.is_empty());
    }

    #[test]
    fn test_bind_form_timestamp() {
        #[derive(Debug, Deserialize)]
        struct Event {
            title: String,
            at: DateTime<Utc>,
        }
        let req = request(
            "GET /events?title=launch&at=2026-03-01T10%3A30%3A00Z HTTP/1.1\r\n",
            "",
        );
        let event: Event = bind_form(&req).unwrap();
        assert_eq!(event.title, "launch");
        assert_eq!(event.at.to_rfc3339(), "2026-03-01T10:30:00+00:00");
    }
}
