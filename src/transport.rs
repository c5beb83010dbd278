use bytecodec::bytes::{BytesEncoder, RemainingBytesDecoder};
use bytecodec::io::IoEncodeExt;
use bytecodec::{DecodeExt, Encode};
use httpcodec::{
    BodyDecoder, BodyEncoder, HeaderField, HttpVersion, Method as HttpMethod, Request,
    RequestEncoder, RequestTarget, ResponseDecoder,
};
use std::fmt;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;
use url::form_urlencoded;
use url::{Position, Url};

use crate::errors::*;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An API call relative to the base URL: raw path segments and query
/// parameters, encoded only when resolved against the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl Route {
    pub fn new(segments: &[&str]) -> Route {
        Route {
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: vec![],
        }
    }

    pub fn param(mut self, name: &str, value: &str) -> Route {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn segments(&self) -> Vec<&str> {
        self.segments.iter().map(String::as_str).collect()
    }

    /// First value of the query parameter `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `base` with the segments appended and the parameters as its query.
    pub fn resolve(&self, base: &Url) -> Result<Url> {
        let mut url = base.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| Error::from(invalid_request(format!("{} cannot be a base", base))))?
            .pop_if_empty()
            .extend(&self.segments);
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url)
    }
}

/// Loggable form, `/a/b?k=v`, with the query form-encoded.
impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        if !self.query.is_empty() {
            let query = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&self.query)
                .finish();
            write!(f, "?{}", query)?;
        }
        Ok(())
    }
}

/// A single request/response exchange with the regtest API.
///
/// Non-2xx replies fail with `ErrorKind::HttpStatus`, carrying the reason
/// phrase.
pub trait Transport: Send + Sync {
    fn request(&self, method: Method, route: &Route, body: Option<&[u8]>) -> Result<Vec<u8>>;
}

/// Base URL of the API, `http://host[:port][/prefix]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    base: Url,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Endpoint> {
        let base =
            Url::parse(url).chain_err(|| invalid_request(format!("invalid API URL {}", url)))?;
        if base.scheme() != "http" {
            bail!(invalid_request(format!(
                "unsupported scheme {} in {}",
                base.scheme(),
                url
            )));
        }
        if base.cannot_be_a_base() {
            bail!(invalid_request(format!("{} cannot be a base", url)));
        }
        let host = match base.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => bail!(invalid_request(format!("missing host in {}", url))),
        };
        let port = base.port_or_known_default().unwrap_or(80);
        Ok(Endpoint { base, host, port })
    }

    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Origin-form request target (path and query) of `route`.
    pub fn target(&self, route: &Route) -> Result<String> {
        let url = route.resolve(&self.base)?;
        Ok(url[Position::BeforePath..Position::AfterQuery].to_string())
    }
}

/// Blocking HTTP/1.1 client, one connection per request.
pub struct HttpTransport {
    endpoint: Endpoint,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<HttpTransport> {
        Ok(HttpTransport {
            endpoint: Endpoint::parse(url)?,
            timeout,
        })
    }

    fn connect(&self) -> Result<TcpStream> {
        let addr = self.endpoint.authority();
        let stream = TcpStream::connect(&addr)
            .chain_err(|| ErrorKind::Connection(format!("failed to connect to {}", addr)))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .chain_err(|| ErrorKind::Connection("failed to set read timeout".into()))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .chain_err(|| ErrorKind::Connection("failed to set write timeout".into()))?;
        let _ = stream.set_nodelay(true);
        Ok(stream)
    }

    fn encode_request(&self, method: Method, route: &Route, body: &[u8]) -> Result<Vec<u8>> {
        let target = self.endpoint.target(route)?;
        let mut request = Request::new(
            HttpMethod::new(method.as_str()).chain_err(|| "invalid HTTP method")?,
            RequestTarget::new(&target)
                .chain_err(|| invalid_request(format!("invalid request target {}", target)))?,
            HttpVersion::V1_1,
            body,
        );
        let host = self.endpoint.authority();
        let mut header = request.header_mut();
        header.add_field(HeaderField::new("Host", &host).chain_err(|| "invalid Host header")?);
        header.add_field(
            HeaderField::new("Connection", "close").chain_err(|| "invalid Connection header")?,
        );
        header.add_field(
            HeaderField::new("Content-Type", "text/plain")
                .chain_err(|| "invalid Content-Type header")?,
        );

        let mut encoder = RequestEncoder::new(BodyEncoder::new(BytesEncoder::new()));
        encoder
            .start_encoding(request)
            .chain_err(|| "failed to encode HTTP request")?;
        let mut buf = Vec::new();
        encoder
            .encode_all(&mut buf)
            .chain_err(|| "failed to encode HTTP request")?;
        Ok(buf)
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: Method, route: &Route, body: Option<&[u8]>) -> Result<Vec<u8>> {
        let raw = self.encode_request(method, route, body.unwrap_or(&[]))?;
        let path = route.to_string();
        let mut stream = self.connect()?;
        stream
            .write_all(&raw)
            .chain_err(|| ErrorKind::Connection(format!("failed to send {} {}", method, path)))?;

        // The server closes the connection after one response.
        let mut reply = Vec::new();
        stream
            .read_to_end(&mut reply)
            .chain_err(|| ErrorKind::Connection(format!("no reply to {} {}", method, path)))?;

        let mut decoder = ResponseDecoder::<BodyDecoder<RemainingBytesDecoder>>::default();
        let response = decoder.decode_from_bytes(&reply).chain_err(|| {
            ErrorKind::InvalidResponse(format!("malformed HTTP reply to {} {}", method, path))
        })?;

        let code = response.status_code().as_u16();
        trace!("{} {} -> {}", method, path, code);
        if !(200..300).contains(&code) {
            let reason = response.reason_phrase().as_str().to_string();
            debug!("{} {} failed: {} {}", method, path, code, reason);
            bail!(ErrorKind::HttpStatus(code, reason));
        }
        Ok(response.into_body())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn target(url: &str, route: &Route) -> String {
        Endpoint::parse(url).unwrap().target(route).unwrap()
    }

    #[test]
    fn test_endpoint_parse() {
        let height = Route::new(&["b", "best", "height"]);
        let e = Endpoint::parse("http://127.0.0.1:8080/1").unwrap();
        assert_eq!("127.0.0.1:8080", e.authority());
        assert_eq!("/1/b/best/height", e.target(&height).unwrap());

        let e = Endpoint::parse("HTTP://localhost/").unwrap();
        assert_eq!("localhost:80", e.authority());
        assert_eq!("/t/push", e.target(&Route::new(&["t", "push"])).unwrap());

        let e = Endpoint::parse("http://user:pw@regtest.local:3000/api/v1/").unwrap();
        assert_eq!("regtest.local:3000", e.authority());
        assert_eq!("/api/v1/b/best/height", e.target(&height).unwrap());
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!(Endpoint::parse("https://127.0.0.1:8080").is_err());
        assert!(Endpoint::parse("http://127.0.0.1:notaport/1").is_err());
        assert!(Endpoint::parse("127.0.0.1:8080/1").is_err());
        assert!(Endpoint::parse("mailto:satoshi@example.com").is_err());
    }

    #[test]
    fn test_route_encoding() {
        let base = "http://127.0.0.1:8080/1";
        let mine = Route::new(&["r", "generate"])
            .param("count", "1")
            .param("key", "pa&count=999");
        assert_eq!(
            "/1/r/generate?count=1&key=pa%26count%3D999",
            target(base, &mine)
        );
        assert_eq!(Some("pa&count=999"), mine.get("key"));
        assert_eq!(Some("1"), mine.get("count"));

        let spaced = Route::new(&["r", "faucet"]).param("key", "two words");
        assert_eq!("/1/r/faucet?key=two+words", target(base, &spaced));

        let odd = Route::new(&["a", "x/y?z#w", "unspents"]);
        assert_eq!("/1/a/x%2Fy%3Fz%23w/unspents", target(base, &odd));
        assert_eq!(vec!["a", "x/y?z#w", "unspents"], odd.segments());

        // a query or fragment on the base URL is not carried over
        assert_eq!(
            "/1/t/push",
            target("http://127.0.0.1:8080/1?x=1#f", &Route::new(&["t", "push"]))
        );
        assert_eq!("/r/generate?count=1&key=pa%26count%3D999", mine.to_string());
    }

    struct Seen {
        method: String,
        url: String,
        body: String,
    }

    /// Serves one request with `status` and `reply`, reporting what it saw.
    fn serve_once(status: u16, reply: &'static str) -> (String, mpsc::Receiver<Seen>) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let url = format!("http://{}/1", server.server_addr());
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut request = server.recv().unwrap();
            let mut body = String::new();
            request.as_reader().read_to_string(&mut body).unwrap();
            tx.send(Seen {
                method: request.method().to_string(),
                url: request.url().to_string(),
                body,
            })
            .unwrap();
            let response = tiny_http::Response::from_string(reply).with_status_code(status);
            request.respond(response).unwrap();
        });
        (url, rx)
    }

    #[test]
    fn test_get_ok() {
        let (url, seen) = serve_once(200, "433");
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let body = transport
            .request(Method::Get, &Route::new(&["b", "best", "height"]), None)
            .unwrap();
        assert_eq!(b"433".to_vec(), body);

        let seen = seen.recv().unwrap();
        assert_eq!("GET", seen.method);
        assert_eq!("/1/b/best/height", seen.url);
    }

    #[test]
    fn test_post_with_body() {
        let (url, seen) = serve_once(200, "");
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let body = transport
            .request(Method::Post, &Route::new(&["t", "push"]), Some(b"0200beef"))
            .unwrap();
        assert!(body.is_empty());

        let seen = seen.recv().unwrap();
        assert_eq!("POST", seen.method);
        assert_eq!("/1/t/push", seen.url);
        assert_eq!("0200beef", seen.body);
    }

    #[test]
    fn test_error_status_carries_reason() {
        let (url, _seen) = serve_once(400, "height too low");
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let faucet = Route::new(&["r", "faucet"])
            .param("address", "x")
            .param("value", "1")
            .param("key", "k");
        let err = transport.request(Method::Post, &faucet, None).unwrap_err();
        assert!(err.is_bad_request());
        match err.kind() {
            ErrorKind::HttpStatus(code, _) => assert_eq!(400, *code),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_connection_refused() {
        // Bind and drop to find a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport =
            HttpTransport::new(&format!("http://127.0.0.1:{}", port), Duration::from_secs(1))
                .unwrap();
        let err = transport
            .request(Method::Get, &Route::new(&["b", "best", "height"]), None)
            .unwrap_err();
        match err.kind() {
            ErrorKind::Connection(_) => (),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_secret_cannot_add_parameters() {
        let (url, seen) = serve_once(200, "[]");
        let transport = HttpTransport::new(&url, Duration::from_secs(5)).unwrap();
        let chain = crate::chain::ChainQuery::new(std::sync::Arc::new(transport), "pa&count=999");
        assert!(chain.mine(1).unwrap().is_empty());
        assert_eq!(
            "/1/r/generate?count=1&key=pa%26count%3D999",
            seen.recv().unwrap().url
        );
    }
}
