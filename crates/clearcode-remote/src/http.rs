use crate::{Method, RemoteConfig, RemoteError, Response, Transport};
use serde_json::Value;
use std::io::Read;
use std::time::Duration;

/// Blocking HTTP client for the replication protocol.
///
/// Every request carries `X-Clearcode-Protocol`, and `Authorization: Bearer`
/// when a token is configured. Non-2xx statuses are returned as responses;
/// only connection failures and timeouts become errors.
pub struct HttpTransport {
    config: RemoteConfig,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(config: RemoteConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs.max(1))))
            .http_status_as_error(false)
            .build()
            .into();
        Self { config, agent }
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn auth_header(&self) -> Option<String> {
        self.config
            .auth_token
            .as_ref()
            .map(|token| format!("Bearer {token}"))
    }

    fn map_error(method: &str, url: &str, err: ureq::Error) -> RemoteError {
        match err {
            ureq::Error::Timeout(t) => RemoteError::Timeout(format!("{method} {url}: {t}")),
            e => RemoteError::Transport(format!("{method} {url}: {e}")),
        }
    }

    fn read_response(
        method: &str,
        url: &str,
        resp: ureq::http::Response<ureq::Body>,
    ) -> Result<Response, RemoteError> {
        let status = resp.status().as_u16();
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Transport(format!("{method} {url}: {e}")))?;
        tracing::debug!("{method} {url} -> {status}");
        Ok(Response::new(status, String::from_utf8_lossy(&body)))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: &str) -> Result<Response, RemoteError> {
        let mut req = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("X-Clearcode-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", &auth);
        }
        let resp = req.call().map_err(|e| Self::map_error("GET", url, e))?;
        Self::read_response("GET", url, resp)
    }

    fn send(&self, url: &str, method: Method, body: &Value) -> Result<Response, RemoteError> {
        let data = serde_json::to_vec(body).map_err(|e| RemoteError::Serialization(e.to_string()))?;
        let req = match method {
            Method::Put => self.agent.put(url),
            Method::Post => self.agent.post(url),
        };
        let mut req = req
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-Clearcode-Protocol", &crate::PROTOCOL_VERSION.to_string());
        if let Some(auth) = self.auth_header() {
            req = req.header("Authorization", &auth);
        }
        let name = method.to_string();
        tracing::debug!("{name} {url} ({} bytes)", data.len());
        let resp = req
            .send(&data[..])
            .map_err(|e| Self::map_error(&name, url, e))?;
        Self::read_response(&name, url, resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct CapturedRequest {
        method: String,
        path: String,
        headers: HashMap<String, String>,
        body: Vec<u8>,
    }

    /// Minimal HTTP/1.1 target. `GET` answers from `routes` (404 otherwise),
    /// `PUT` answers 200 and `POST` 201, both echoing the body. Requests to
    /// `/slow/` stall past any short client timeout.
    struct MockServer {
        addr: String,
        _handle: std::thread::JoinHandle<()>,
        requests: Arc<Mutex<Vec<CapturedRequest>>>,
    }

    impl MockServer {
        fn start(routes: &[(&str, u16, &str)]) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = format!("http://{}", listener.local_addr().unwrap());
            let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
                routes
                    .iter()
                    .map(|(p, s, b)| ((*p).to_owned(), (*s, (*b).to_owned())))
                    .collect(),
            );
            let requests: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));

            let requests_clone = Arc::clone(&requests);
            let handle = std::thread::spawn(move || {
                for stream in listener.incoming() {
                    let Ok(mut stream) = stream else { break };
                    let routes = Arc::clone(&routes);
                    let reqs = Arc::clone(&requests_clone);

                    std::thread::spawn(move || {
                        let mut reader = BufReader::new(stream.try_clone().unwrap());
                        let mut request_line = String::new();
                        if reader.read_line(&mut request_line).is_err() {
                            return;
                        }
                        let parts: Vec<&str> = request_line.trim().splitn(3, ' ').collect();
                        if parts.len() < 2 {
                            return;
                        }
                        let method = parts[0].to_owned();
                        let path = parts[1].to_owned();

                        let mut content_length: usize = 0;
                        let mut headers = HashMap::new();
                        loop {
                            let mut line = String::new();
                            if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
                                break;
                            }
                            if let Some((k, v)) = line.trim().split_once(": ") {
                                headers.insert(k.to_lowercase(), v.to_owned());
                            }
                            let lower = line.to_lowercase();
                            if let Some(val) = lower.strip_prefix("content-length: ") {
                                content_length = val.trim().parse().unwrap_or(0);
                            }
                        }

                        let mut body = vec![0u8; content_length];
                        if content_length > 0 {
                            let _ = reader.read_exact(&mut body);
                        }
                        reqs.lock().unwrap().push(CapturedRequest {
                            method: method.clone(),
                            path: path.clone(),
                            headers,
                            body: body.clone(),
                        });

                        if path.starts_with("/slow/") {
                            std::thread::sleep(Duration::from_secs(3));
                        }

                        let (status, reply) = match method.as_str() {
                            "GET" => routes
                                .get(&path)
                                .cloned()
                                .unwrap_or((404, r#"{"detail":"Not found."}"#.to_owned())),
                            "PUT" => (200, String::from_utf8_lossy(&body).into_owned()),
                            "POST" => (201, String::from_utf8_lossy(&body).into_owned()),
                            _ => (405, String::new()),
                        };
                        let response = format!(
                            "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                            reply.len()
                        );
                        let _ = stream.write_all(response.as_bytes());
                        let _ = stream.flush();
                    });
                }
            });

            MockServer {
                addr,
                _handle: handle,
                requests,
            }
        }

        fn captured_requests(&self) -> Vec<CapturedRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    fn transport(url: &str) -> HttpTransport {
        HttpTransport::new(RemoteConfig::new(url))
    }

    #[test]
    fn fetch_returns_status_and_body() {
        let server = MockServer::start(&[("/cditems/", 200, "[]"), ("/cditems/u1/", 200, r#"{"uuid":"u1"}"#)]);
        let t = transport(&server.addr);

        let resp = t.fetch(&format!("{}/cditems/u1/", server.addr)).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"uuid":"u1"}"#);
    }

    #[test]
    fn error_statuses_are_responses_not_errors() {
        let server = MockServer::start(&[("/broken/", 500, "Server Error")]);
        let t = transport(&server.addr);

        let missing = t.fetch(&format!("{}/cditems/nope/", server.addr)).unwrap();
        assert_eq!(missing.status, 404);
        let broken = t.fetch(&format!("{}/broken/", server.addr)).unwrap();
        assert_eq!(broken.status, 500);
        assert_eq!(broken.body, "Server Error");
    }

    #[test]
    fn send_posts_json_body() {
        let server = MockServer::start(&[]);
        let t = transport(&server.addr);
        let payload = json!({"uuid": "u2", "path": "npm/npmjs/-/x.json"});

        let resp = t
            .send(&format!("{}/cditems/", server.addr), Method::Post, &payload)
            .unwrap();
        assert_eq!(resp.status, 201);

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].path, "/cditems/");
        assert_eq!(
            reqs[0].headers.get("content-type").map(String::as_str),
            Some("application/json")
        );
        let sent: Value = serde_json::from_slice(&reqs[0].body).unwrap();
        assert_eq!(sent, payload);
    }

    #[test]
    fn send_put_uses_put_method() {
        let server = MockServer::start(&[]);
        let t = transport(&server.addr);
        let resp = t
            .send(&format!("{}/cditems/u3/", server.addr), Method::Put, &json!({"uuid": "u3"}))
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(server.captured_requests()[0].method, "PUT");
    }

    #[test]
    fn requests_include_protocol_header() {
        let server = MockServer::start(&[("/cditems/", 200, "[]")]);
        let t = transport(&server.addr);

        t.fetch(&format!("{}/cditems/", server.addr)).unwrap();
        t.send(&format!("{}/cditems/", server.addr), Method::Post, &json!({}))
            .unwrap();

        let reqs = server.captured_requests();
        assert_eq!(reqs.len(), 2);
        for req in &reqs {
            assert_eq!(
                req.headers.get("x-clearcode-protocol"),
                Some(&"1".to_owned()),
                "{} {} missing X-Clearcode-Protocol header",
                req.method,
                req.path
            );
        }
    }

    #[test]
    fn auth_token_sent_as_bearer_header() {
        let server = MockServer::start(&[]);
        let t = HttpTransport::new(RemoteConfig::new(&server.addr).with_token("secret-token-42"));
        t.send(&format!("{}/cditems/", server.addr), Method::Post, &json!({}))
            .unwrap();

        let reqs = server.captured_requests();
        assert_eq!(
            reqs[0].headers.get("authorization"),
            Some(&"Bearer secret-token-42".to_owned())
        );
    }

    #[test]
    fn no_auth_header_without_token() {
        let server = MockServer::start(&[]);
        let t = transport(&server.addr);
        let _ = t.fetch(&format!("{}/cditems/", server.addr));
        assert!(!server.captured_requests()[0]
            .headers
            .contains_key("authorization"));
    }

    #[test]
    fn connection_refused_is_transport_error() {
        let t = transport("http://127.0.0.1:1");
        let err = t.fetch("http://127.0.0.1:1/cditems/").unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)), "{err}");
    }

    #[test]
    fn slow_target_times_out() {
        let server = MockServer::start(&[]);
        let t = HttpTransport::new(RemoteConfig::new(&server.addr).with_timeout_secs(1));
        let err = t.fetch(&format!("{}/slow/", server.addr)).unwrap_err();
        assert!(matches!(err, RemoteError::Timeout(_)), "{err}");
    }
}
