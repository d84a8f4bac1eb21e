use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use url::Url;

use super::AuthError;

const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Loopback listener bound to the port of the configured redirect URL.
#[derive(Debug)]
pub struct CallbackListener {
    listener: TcpListener,
    redirect_uri: String,
}

impl CallbackListener {
    /// Bind the host and port named by `redirect_uri`.
    ///
    /// Port `0` binds an ephemeral port; [`redirect_uri`](Self::redirect_uri)
    /// then reports the actual port so the provider redirects to it.
    pub async fn bind(redirect_uri: &str) -> Result<Self, AuthError> {
        let invalid = |reason: &str| AuthError::InvalidRedirectUri {
            url: redirect_uri.to_owned(),
            reason: reason.to_owned(),
        };
        let url = Url::parse(redirect_uri).map_err(|err| invalid(&err.to_string()))?;
        if url.scheme() != "http" {
            return Err(invalid("only http loopback URLs are supported"));
        }
        let host = url
            .host_str()
            .ok_or_else(|| invalid("missing host"))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_owned();
        let port = url.port().ok_or_else(|| invalid("missing port"))?;

        let listener = TcpListener::bind((host.as_str(), port))
            .await
            .map_err(|source| AuthError::Bind { port, source })?;

        let redirect_uri = if port == 0 {
            let bound = listener.local_addr()?.port();
            let mut url = url;
            url.set_port(Some(bound))
                .map_err(|_| invalid("cannot carry a port"))?;
            url.as_str().trim_end_matches('/').to_owned()
        } else {
            redirect_uri.to_owned()
        };
        debug!(%redirect_uri, "listening for authorization callback");

        Ok(Self {
            listener,
            redirect_uri,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Wait for the provider's redirect and read its request line.
    ///
    /// Connections are read concurrently, so an idle preconnect cannot hold
    /// up the real redirect; connections that close without a request line
    /// are dropped. `timeout` bounds the whole wait. With no timeout this
    /// waits until a request arrives or the process is interrupted.
    pub async fn accept(&self, timeout: Option<Duration>) -> Result<CallbackConnection, AuthError> {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.next_request())
                .await
                .map_err(|_| AuthError::CallbackTimeout(limit))?,
            None => self.next_request().await,
        }
    }

    async fn next_request(&self) -> Result<CallbackConnection, AuthError> {
        let mut pending = JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (mut stream, peer) = accepted?;
                    debug!(%peer, "accepted connection on callback port");
                    pending.spawn(async move {
                        let head = read_request_head(&mut stream).await;
                        (stream, peer, head)
                    });
                }
                Some(joined) = pending.join_next(), if !pending.is_empty() => {
                    let Ok((stream, peer, head)) = joined else {
                        continue;
                    };
                    match head {
                        Ok(head) if request_target(&head).is_ok() => {
                            debug!(%peer, "received authorization callback");
                            let request = CallbackRequest::parse(&head);
                            return Ok(CallbackConnection { stream, request });
                        }
                        Ok(_) => debug!(%peer, "dropping connection without a request line"),
                        Err(err) => debug!(%peer, error = %err, "dropping unreadable connection"),
                    }
                }
            }
        }
    }

    /// Close the connection and the listener in a detached task.
    ///
    /// The response must already be written; nothing waits for the close.
    pub fn close(self, connection: CallbackConnection) {
        let CallbackConnection { mut stream, .. } = connection;
        tokio::spawn(async move {
            let _ = stream.shutdown().await;
            drop(self.listener);
            debug!("callback listener closed");
        });
    }
}

async fn read_request_head(stream: &mut TcpStream) -> std::io::Result<String> {
    let mut buffer = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.windows(4).any(|w| w == b"\r\n\r\n") || buffer.len() >= MAX_REQUEST_BYTES {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Query parameters of the provider's redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackRequest {
    pub code: Option<String>,
    pub error: Option<String>,
    pub malformed: Option<String>,
}

impl CallbackRequest {
    fn parse(head: &str) -> Self {
        match request_target(head) {
            Ok(target) => Self::from_target(target),
            Err(reason) => Self {
                malformed: Some(reason.to_owned()),
                ..Self::default()
            },
        }
    }

    fn from_target(target: &str) -> Self {
        let mut request = Self::default();
        let url = match Url::parse("http://localhost").and_then(|base| base.join(target)) {
            Ok(url) => url,
            Err(err) => {
                request.malformed = Some(err.to_string());
                return request;
            }
        };
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" if !value.is_empty() => request.code = Some(value.into_owned()),
                "error" => {
                    let description = url
                        .query_pairs()
                        .find(|(k, _)| k == "error_description")
                        .map(|(_, v)| format!("{value}: {v}"));
                    request.error = Some(description.unwrap_or_else(|| value.into_owned()));
                }
                _ => {}
            }
        }
        request
    }

    /// The authorization code, or the reason there is none.
    pub fn into_code(self) -> Result<String, AuthError> {
        if let Some(reason) = self.malformed {
            return Err(AuthError::InvalidCallback(reason));
        }
        if let Some(error) = self.error {
            return Err(AuthError::AccessDenied(error));
        }
        self.code.ok_or(AuthError::MissingAuthorizationCode)
    }
}

fn request_target(head: &str) -> Result<&str, &'static str> {
    let first_line = head.lines().next().ok_or("missing request line")?;
    let mut parts = first_line.split_whitespace();
    let _method = parts.next().ok_or("missing method")?;
    parts.next().ok_or("missing path")
}

/// The single accepted callback connection.
#[derive(Debug)]
pub struct CallbackConnection {
    stream: TcpStream,
    request: CallbackRequest,
}

impl CallbackConnection {
    pub fn request(&self) -> &CallbackRequest {
        &self.request
    }

    pub async fn respond_success(&mut self, name: &str) {
        let body = success_page(name);
        self.respond(200, "text/html; charset=utf-8", &body).await;
    }

    pub async fn respond_failure(&mut self, err: &AuthError) {
        let status = match err {
            AuthError::MissingAuthorizationCode
            | AuthError::AccessDenied(_)
            | AuthError::InvalidCallback(_) => 400,
            _ => 500,
        };
        self.respond(status, "text/plain; charset=utf-8", &err.browser_message())
            .await;
    }

    async fn respond(&mut self, status: u16, content_type: &str, body: &str) {
        let status_line = match status {
            200 => "HTTP/1.1 200 OK",
            400 => "HTTP/1.1 400 Bad Request",
            _ => "HTTP/1.1 500 Internal Server Error",
        };
        let response = format!(
            "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let written = async {
            self.stream.write_all(response.as_bytes()).await?;
            self.stream.flush().await
        };
        // The login outcome is already decided; a browser that went away only costs the page.
        if let Err(err) = written.await {
            warn!(error = %err, "could not write callback response to the browser");
        }
    }
}

fn success_page(name: &str) -> String {
    format!(
        r#"<html>
  <head><title>SnapMaster</title></head>
  <body style="background: #000; color: #fff; font-family: sans-serif; font-weight: 300;">
    <center style="margin: 100px">
      <h1>Hi, {}! You've logged in successfully.</h1>
      <h2>You can close this window and return to the snap CLI.</h2>
    </center>
  </body>
</html>"#,
        escape_html(name)
    )
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_code_from_root_path() {
        let request = CallbackRequest::parse("GET /?code=abc%2F123 HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert_eq!(request.code.as_deref(), Some("abc/123"));
        assert_eq!(request.into_code().unwrap(), "abc/123");
    }

    #[test]
    fn missing_code() {
        let request = CallbackRequest::parse("GET /?state=x HTTP/1.1\r\n\r\n");
        assert!(matches!(
            request.into_code(),
            Err(AuthError::MissingAuthorizationCode)
        ));
        let empty = CallbackRequest::parse("GET /?code= HTTP/1.1\r\n\r\n");
        assert!(matches!(
            empty.into_code(),
            Err(AuthError::MissingAuthorizationCode)
        ));
    }

    #[test]
    fn provider_error_is_access_denied() {
        let request = CallbackRequest::parse(
            "GET /?error=access_denied&error_description=User%20cancelled HTTP/1.1\r\n\r\n",
        );
        match request.into_code() {
            Err(AuthError::AccessDenied(reason)) => {
                assert_eq!(reason, "access_denied: User cancelled")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn garbage_request_line() {
        let request = CallbackRequest::parse("");
        assert!(matches!(
            request.into_code(),
            Err(AuthError::InvalidCallback(_))
        ));
    }

    #[test]
    fn success_page_escapes_name() {
        let page = success_page("<b>Ada</b>");
        assert!(page.contains("Hi, &lt;b&gt;Ada&lt;/b&gt;!"));
    }

    #[tokio::test]
    async fn bind_rejects_urls_without_port() {
        for url in ["http://localhost", "not a url", "https://localhost:8085"] {
            let err = CallbackListener::bind(url).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidRedirectUri { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn bind_reports_port_in_use() {
        let taken = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let err = CallbackListener::bind(&format!("http://127.0.0.1:{port}"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Bind { port: p, .. } if p == port));
    }

    #[tokio::test]
    async fn ephemeral_port_is_reported() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").await.unwrap();
        let url = Url::parse(listener.redirect_uri()).unwrap();
        assert_ne!(url.port(), Some(0));
        assert!(!listener.redirect_uri().ends_with('/'));
    }

    #[tokio::test]
    async fn accept_times_out() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").await.unwrap();
        let err = listener
            .accept(Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackTimeout(_)));
    }

    #[tokio::test]
    async fn idle_and_empty_connections_do_not_block_the_redirect() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").await.unwrap();
        let port = Url::parse(listener.redirect_uri()).unwrap().port().unwrap();

        let idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let empty = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        drop(empty);
        let mut real = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        real.write_all(b"GET /?code=second HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();

        let connection = listener
            .accept(Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(connection.request().code.as_deref(), Some("second"));
        drop(idle);
    }

    #[tokio::test]
    async fn timeout_covers_idle_connections() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").await.unwrap();
        let port = Url::parse(listener.redirect_uri()).unwrap().port().unwrap();
        let _idle = TcpStream::connect(("127.0.0.1", port)).await.unwrap();

        let err = listener
            .accept(Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CallbackTimeout(_)));
    }

    #[tokio::test]
    async fn responds_then_closes() {
        let listener = CallbackListener::bind("http://127.0.0.1:0").await.unwrap();
        let url = Url::parse(listener.redirect_uri()).unwrap();
        let port = url.port().unwrap();

        let browser = tokio::spawn(async move {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
            stream
                .write_all(b"GET /?code=xyz HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let mut connection = listener.accept(None).await.unwrap();
        assert_eq!(connection.request().code.as_deref(), Some("xyz"));
        connection.respond_success("Ada").await;
        listener.close(connection);

        let response = browser.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Hi, Ada!"));
    }
}
