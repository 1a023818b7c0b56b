use {
    super::{
        errors::{RtspError, RtspErrorValue},
        reason_phrase, RTSP_VERSION,
    },
    bytes::{Buf, Bytes, BytesMut},
    std::fmt,
};

const MAX_HEADER_SIZE: usize = 8 * 1024;
const MAX_BODY_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Announce,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
    Record,
    Other(String),
}

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        match s {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "ANNOUNCE" => Self::Announce,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            "SET_PARAMETER" => Self::SetParameter,
            "RECORD" => Self::Record,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::SetParameter => "SET_PARAMETER",
            Self::Record => "RECORD",
            Self::Other(other) => other,
        };
        f.write_str(name)
    }
}

/// Ordered header list with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            slot.1 = value;
        } else {
            self.0.push((name, value));
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspRequest {
    pub method: Method,
    pub uri: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspRequest {
    #[must_use]
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn cseq(&self) -> Option<&str> {
        self.headers.get("CSeq")
    }

    /// Path component of the request URI without leading or trailing
    /// slashes, e.g. `live/cam1` for `rtsp://host:8554/live/cam1/`.
    #[must_use]
    pub fn path(&self) -> String {
        let without_scheme = self
            .uri
            .split_once("://")
            .map_or(self.uri.as_str(), |(_, rest)| rest);
        let path = without_scheme
            .find('/')
            .map_or("", |idx| &without_scheme[idx..]);
        let path = path.split('?').next().unwrap_or_default();
        path.trim_matches('/').to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtspResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

impl RtspResponse {
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    /// Response to `request`, echoing its CSeq.
    #[must_use]
    pub fn reply(request: &RtspRequest, status: u16) -> Self {
        let response = Self::new(status);
        match request.cseq() {
            Some(cseq) => response.header("CSeq", cseq),
            None => response,
        }
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.insert("Content-Type", content_type);
        self.body = body.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterleavedFrame {
    pub channel: u8,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspMessage {
    Request(RtspRequest),
    Response(RtspResponse),
    Interleaved(InterleavedFrame),
}

impl RtspMessage {
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Request(request) => {
                out.extend_from_slice(
                    format!("{} {} {RTSP_VERSION}\r\n", request.method, request.uri).as_bytes(),
                );
                encode_headers_and_body(out, &request.headers, &request.body);
            }
            Self::Response(response) => {
                out.extend_from_slice(
                    format!(
                        "{RTSP_VERSION} {} {}\r\n",
                        response.status,
                        reason_phrase(response.status)
                    )
                    .as_bytes(),
                );
                encode_headers_and_body(out, &response.headers, &response.body);
            }
            Self::Interleaved(frame) => {
                out.extend_from_slice(&[b'$', frame.channel]);
                out.extend_from_slice(&(frame.payload.len() as u16).to_be_bytes());
                out.extend_from_slice(&frame.payload);
            }
        }
    }

    #[must_use]
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::new();
        self.encode(&mut out);
        out
    }
}

fn encode_headers_and_body(out: &mut BytesMut, headers: &Headers, body: &[u8]) {
    for (name, value) in headers.iter() {
        if name.eq_ignore_ascii_case("Content-Length") {
            continue;
        }
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if !body.is_empty() {
        out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
}

/// Incremental parser for a byte stream carrying RTSP messages and
/// interleaved binary frames. Nothing is consumed until a whole message is
/// buffered.
#[derive(Default)]
pub struct RtspParser {
    buffer: BytesMut,
}

impl RtspParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_message(&mut self) -> Result<Option<RtspMessage>, RtspError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        if self.buffer[0] == b'$' {
            return Ok(self.next_interleaved());
        }

        let Some(header_end) = find_header_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_SIZE {
                return Err(RtspErrorValue::HeaderTooLarge(MAX_HEADER_SIZE).into());
            }
            return Ok(None);
        };

        let head = std::str::from_utf8(&self.buffer[..header_end])
            .map_err(|_| RtspErrorValue::InvalidEncoding)?;
        let mut lines = head.split("\r\n");
        let start_line = lines.next().unwrap_or_default().to_string();
        let mut headers = Headers::default();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RtspErrorValue::MalformedHeader(line.to_string()))?;
            headers.insert(name.trim(), value.trim());
        }

        let content_length = match headers.get("Content-Length") {
            Some(value) => value
                .parse::<usize>()
                .map_err(|_| RtspErrorValue::InvalidContentLength)?,
            None => 0,
        };
        if content_length > MAX_BODY_SIZE {
            return Err(RtspErrorValue::BodyTooLarge(content_length).into());
        }
        let total = header_end + 4 + content_length;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let message = parse_start_line(&start_line, headers)?;
        self.buffer.advance(header_end + 4);
        let body = self.buffer.split_to(content_length).freeze();
        Ok(Some(match message {
            RtspMessage::Request(mut request) => {
                request.body = body;
                RtspMessage::Request(request)
            }
            RtspMessage::Response(mut response) => {
                response.body = body;
                RtspMessage::Response(response)
            }
            interleaved @ RtspMessage::Interleaved(_) => interleaved,
        }))
    }

    fn next_interleaved(&mut self) -> Option<RtspMessage> {
        if self.buffer.len() < 4 {
            return None;
        }
        let channel = self.buffer[1];
        let length = u16::from_be_bytes([self.buffer[2], self.buffer[3]]) as usize;
        if self.buffer.len() < 4 + length {
            return None;
        }
        self.buffer.advance(4);
        let payload = self.buffer.split_to(length).freeze();
        Some(RtspMessage::Interleaved(InterleavedFrame { channel, payload }))
    }
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_start_line(line: &str, headers: Headers) -> Result<RtspMessage, RtspError> {
    let mut parts = line.splitn(3, ' ');
    let first = parts.next().unwrap_or_default();
    let second = parts.next();
    let third = parts.next();

    if first.starts_with("RTSP/") {
        if first != RTSP_VERSION {
            return Err(RtspErrorValue::UnsupportedVersion(first.to_string()).into());
        }
        let status = second
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(|| RtspErrorValue::MalformedStartLine(line.to_string()))?;
        return Ok(RtspMessage::Response(RtspResponse {
            status,
            headers,
            body: Bytes::new(),
        }));
    }

    let (Some(uri), Some(version)) = (second, third) else {
        return Err(RtspErrorValue::MalformedStartLine(line.to_string()).into());
    };
    if version != RTSP_VERSION {
        return Err(RtspErrorValue::UnsupportedVersion(version.to_string()).into());
    }
    Ok(RtspMessage::Request(RtspRequest {
        method: Method::from(first),
        uri: uri.to_string(),
        headers,
        body: Bytes::new(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_request_in_pieces() {
        let raw = b"DESCRIBE rtsp://localhost:8554/live/cam1 RTSP/1.0\r\nCSeq: 2\r\nAccept: application/sdp\r\n\r\n";
        let mut parser = RtspParser::new();
        parser.extend_data(&raw[..20]);
        assert!(parser.next_message().unwrap().is_none());
        parser.extend_data(&raw[20..]);

        let Some(RtspMessage::Request(request)) = parser.next_message().unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, Method::Describe);
        assert_eq!(request.cseq(), Some("2"));
        assert_eq!(request.headers.get("accept"), Some("application/sdp"));
        assert_eq!(request.path(), "live/cam1");
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_interleaved_frames_between_requests() {
        let mut parser = RtspParser::new();
        parser.extend_data(&[b'$', 1, 0, 3, 9, 8, 7]);
        parser.extend_data(b"GET_PARAMETER rtsp://h/live RTSP/1.0\r\nCSeq: 9\r\n\r\n");

        assert_eq!(
            parser.next_message().unwrap(),
            Some(RtspMessage::Interleaved(InterleavedFrame {
                channel: 1,
                payload: Bytes::from_static(&[9, 8, 7]),
            }))
        );
        let Some(RtspMessage::Request(request)) = parser.next_message().unwrap() else {
            panic!("expected request");
        };
        assert_eq!(request.method, Method::GetParameter);
    }

    #[test]
    fn test_response_round_trip_with_body() {
        let response = RtspResponse::new(200)
            .header("CSeq", "3")
            .body("application/sdp", Bytes::from_static(b"v=0\r\n"));
        let bytes = RtspMessage::Response(response.clone()).to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("RTSP/1.0 200 OK\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));

        let mut parser = RtspParser::new();
        parser.extend_data(&bytes);
        let Some(RtspMessage::Response(parsed)) = parser.next_message().unwrap() else {
            panic!("expected response");
        };
        assert_eq!(parsed.status, 200);
        assert_eq!(&parsed.body[..], b"v=0\r\n");
    }

    #[test]
    fn test_rejects_wrong_version_and_garbage() {
        let mut parser = RtspParser::new();
        parser.extend_data(b"OPTIONS * HTTP/1.1\r\n\r\n");
        assert!(matches!(
            parser.next_message().unwrap_err().value,
            RtspErrorValue::UnsupportedVersion(_)
        ));

        let mut parser = RtspParser::new();
        parser.extend_data(&vec![b'a'; MAX_HEADER_SIZE + 1]);
        assert!(matches!(
            parser.next_message().unwrap_err().value,
            RtspErrorValue::HeaderTooLarge(_)
        ));
    }

    #[test]
    fn test_path_extraction() {
        let request = RtspRequest::new(Method::Setup, "rtsp://10.0.0.1:8554/cam/trackID=0?x=1");
        assert_eq!(request.path(), "cam/trackID=0");
        assert_eq!(RtspRequest::new(Method::Options, "*").path(), "");
    }
}
