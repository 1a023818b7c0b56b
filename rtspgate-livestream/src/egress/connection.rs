//! One RTSP control connection and the session it carries.
//!
//! Media is sent as interleaved RTP on the same TCP connection, so a
//! connection holds at most one session. The connection ends on TEARDOWN,
//! client EOF, idle timeout, server shutdown, or when the path it plays is
//! closed.

use bytes::BytesMut;
use rtspgate_core::metrics;
use rtspgate_media::rtp::aac::AacPacketizer;
use rtspgate_media::rtp::h264::H264Packetizer;
use rtspgate_media::rtp::Packetizer;
use rtspgate_media::rtsp::errors::{RtspError, RtspErrorValue, TransportError};
use rtspgate_media::rtsp::message::{
    InterleavedFrame, Method, RtspMessage, RtspParser, RtspRequest, RtspResponse,
};
use rtspgate_media::rtsp::sdp::{build_sdp, track_id_from_uri, TrackDescription};
use rtspgate_media::rtsp::status;
use rtspgate_media::rtsp::transport::{negotiate, InterleavedTransport};
use rtspgate_media::EgressFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::hub::{EgressHub, SubscribeError, Subscription};

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, GET_PARAMETER, TEARDOWN";
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

struct TrackSetup {
    track_id: usize,
    video: bool,
    transport: InterleavedTransport,
    packetizer: Box<dyn Packetizer>,
}

struct RtspSession {
    id: String,
    path: String,
    tracks: Vec<TrackSetup>,
    subscription: Option<Subscription>,
}

pub struct RtspConnection<S> {
    io: S,
    hub: Arc<EgressHub>,
    parser: RtspParser,
    /// Host advertised in the SDP origin line.
    origin_host: String,
    idle_timeout: Duration,
    session: Option<RtspSession>,
}

impl<S> RtspConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, hub: Arc<EgressHub>, origin_host: String, idle_timeout: Duration) -> Self {
        Self {
            io,
            hub,
            parser: RtspParser::new(),
            origin_host,
            idle_timeout,
            session: None,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let mut read_buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let idle = tokio::time::sleep(self.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!("RTSP connection closed on shutdown");
                    return Ok(());
                }
                () = &mut idle => {
                    info!(timeout_secs = self.idle_timeout.as_secs(), "RTSP connection idle, closing");
                    return Ok(());
                }
                read = self.io.read_buf(&mut read_buf) => {
                    if read? == 0 {
                        debug!("RTSP client disconnected");
                        return Ok(());
                    }
                    idle.as_mut().reset(Instant::now() + self.idle_timeout);
                    self.parser.extend_data(&read_buf);
                    read_buf.clear();
                    if self.drain_messages().await? == Flow::Close {
                        return Ok(());
                    }
                }
                frame = next_frame(&mut self.session) => match frame {
                    Some(frame) => self.send_frame(&frame).await?,
                    None => {
                        info!("Egress path closed, ending RTSP session");
                        self.session = None;
                        return Ok(());
                    }
                },
            }
        }
    }

    async fn drain_messages(&mut self) -> anyhow::Result<Flow> {
        loop {
            let message = match self.parser.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(Flow::Continue),
                Err(e) => {
                    self.reject_malformed(&e).await?;
                    return Err(e.into());
                }
            };
            match message {
                RtspMessage::Request(request) => {
                    debug!(method = %request.method, uri = %request.uri, "RTSP request");
                    let (response, flow) = self.handle_request(&request);
                    self.write_message(&RtspMessage::Response(response)).await?;
                    if flow == Flow::Close {
                        return Ok(Flow::Close);
                    }
                    if request.method == Method::Play {
                        self.send_replay().await?;
                    }
                }
                // receiver reports from the client
                RtspMessage::Interleaved(_) | RtspMessage::Response(_) => {}
            }
        }
    }

    async fn reject_malformed(&mut self, error: &RtspError) -> anyhow::Result<()> {
        let code = match error.value {
            RtspErrorValue::UnsupportedVersion(_) => status::VERSION_NOT_SUPPORTED,
            _ => status::BAD_REQUEST,
        };
        info!(error = %error, "Malformed RTSP message, closing connection");
        self.write_message(&RtspMessage::Response(RtspResponse::new(code)))
            .await
    }

    fn handle_request(&mut self, request: &RtspRequest) -> (RtspResponse, Flow) {
        if let Some(response) = self.check_session_header(request) {
            return (response, Flow::Continue);
        }
        match request.method {
            Method::Options => (
                RtspResponse::reply(request, status::OK).header("Public", PUBLIC_METHODS),
                Flow::Continue,
            ),
            Method::Describe => (self.describe(request), Flow::Continue),
            Method::Setup => (self.setup(request), Flow::Continue),
            Method::Play => (self.play(request), Flow::Continue),
            Method::Pause => (self.pause(request), Flow::Continue),
            Method::GetParameter | Method::SetParameter => {
                (self.with_session(RtspResponse::reply(request, status::OK)), Flow::Continue)
            }
            Method::Teardown => {
                let response = self.with_session(RtspResponse::reply(request, status::OK));
                self.session = None;
                (response, Flow::Close)
            }
            Method::Announce | Method::Record => (
                RtspResponse::reply(request, status::METHOD_NOT_ALLOWED)
                    .header("Allow", PUBLIC_METHODS),
                Flow::Continue,
            ),
            Method::Other(_) => (
                RtspResponse::reply(request, status::NOT_IMPLEMENTED),
                Flow::Continue,
            ),
        }
    }

    /// 454 when the request names a session this connection does not hold.
    fn check_session_header(&self, request: &RtspRequest) -> Option<RtspResponse> {
        let requested = request.headers.get("Session")?;
        let requested = requested.split(';').next().unwrap_or_default().trim();
        match &self.session {
            Some(session) if session.id == requested => None,
            _ => Some(RtspResponse::reply(request, status::SESSION_NOT_FOUND)),
        }
    }

    fn with_session(&self, response: RtspResponse) -> RtspResponse {
        match &self.session {
            Some(session) => response.header(
                "Session",
                format!("{};timeout={}", session.id, self.idle_timeout.as_secs()),
            ),
            None => response,
        }
    }

    fn describe(&self, request: &RtspRequest) -> RtspResponse {
        let path = request.path();
        let Some(mount) = self.hub.lookup(&path) else {
            return RtspResponse::reply(request, status::NOT_FOUND);
        };
        let tracks = mount.tracks();
        if tracks.is_empty() {
            return RtspResponse::reply(request, status::SERVICE_UNAVAILABLE);
        }
        let sdp = build_sdp(mount.session_name(), &self.origin_host, &tracks);
        let base = format!("{}/", request.uri.trim_end_matches('/'));
        RtspResponse::reply(request, status::OK)
            .header("Content-Base", base)
            .body("application/sdp", sdp.into_bytes())
    }

    fn setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let (path, track_id) = split_control(&request.path());
        let track_id = track_id.unwrap_or(0);

        if let Some(session) = &self.session {
            if session.path != path {
                return RtspResponse::reply(request, status::METHOD_NOT_VALID_IN_THIS_STATE);
            }
        }
        let Some(mount) = self.hub.lookup(&path) else {
            return RtspResponse::reply(request, status::NOT_FOUND);
        };
        let tracks = mount.tracks();
        if tracks.is_empty() {
            return RtspResponse::reply(request, status::SERVICE_UNAVAILABLE);
        }
        let Some(track) = tracks.get(track_id) else {
            return RtspResponse::reply(request, status::NOT_FOUND);
        };

        let default_channel = u8::try_from(track_id * 2).unwrap_or(0);
        let transport = match negotiate(request.headers.get("Transport"), default_channel) {
            Ok(transport) => transport,
            Err(TransportError::Unsupported) => {
                return RtspResponse::reply(request, status::UNSUPPORTED_TRANSPORT)
            }
            Err(e) => {
                debug!(error = %e, "Rejecting SETUP transport");
                return RtspResponse::reply(request, status::BAD_REQUEST);
            }
        };

        let packetizer: Box<dyn Packetizer> = match track {
            TrackDescription::H264 { sps, pps } => {
                Box::new(H264Packetizer::new().with_parameter_sets(sps.clone(), pps.clone()))
            }
            TrackDescription::Aac { .. } => Box::new(AacPacketizer::new()),
        };
        let ssrc = packetizer.ssrc();

        let session = self.session.get_or_insert_with(|| RtspSession {
            id: nanoid::nanoid!(16),
            path: path.clone(),
            tracks: Vec::new(),
            subscription: None,
        });
        session.tracks.retain(|t| t.track_id != track_id);
        session.tracks.push(TrackSetup {
            track_id,
            video: track.is_video(),
            transport,
            packetizer,
        });
        info!(path = %path, track_id, session = %session.id, "RTSP track set up");

        self.with_session(
            RtspResponse::reply(request, status::OK)
                .header("Transport", transport.header_value(ssrc)),
        )
    }

    fn play(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.session.as_mut() else {
            return RtspResponse::reply(request, status::METHOD_NOT_VALID_IN_THIS_STATE);
        };
        if session.tracks.is_empty() {
            return RtspResponse::reply(request, status::METHOD_NOT_VALID_IN_THIS_STATE);
        }
        if session.subscription.is_none() {
            match self.hub.subscribe(&session.path) {
                Ok(subscription) => session.subscription = Some(subscription),
                Err(e) => {
                    info!(path = %session.path, error = %e, "PLAY refused");
                    let code = match e {
                        SubscribeError::NotFound => status::NOT_FOUND,
                        SubscribeError::NoTracks => status::SERVICE_UNAVAILABLE,
                        SubscribeError::Full(_) => status::NOT_ENOUGH_BANDWIDTH,
                    };
                    return RtspResponse::reply(request, code);
                }
            }
            info!(path = %session.path, session = %session.id, "RTSP playback started");
        }
        self.with_session(RtspResponse::reply(request, status::OK).header("Range", "npt=0.000-"))
    }

    fn pause(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(session) = self.session.as_mut() else {
            return RtspResponse::reply(request, status::METHOD_NOT_VALID_IN_THIS_STATE);
        };
        if session.subscription.take().is_some() {
            debug!(session = %session.id, "RTSP playback paused");
        }
        self.with_session(RtspResponse::reply(request, status::OK))
    }

    async fn send_replay(&mut self) -> anyhow::Result<()> {
        let replay = match self
            .session
            .as_mut()
            .and_then(|s| s.subscription.as_mut())
        {
            Some(subscription) => subscription.take_replay(),
            None => return Ok(()),
        };
        for frame in &replay {
            self.send_frame(frame).await?;
        }
        Ok(())
    }

    async fn send_frame(&mut self, frame: &EgressFrame) -> anyhow::Result<()> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let is_video = matches!(frame, EgressFrame::Video { .. });
        let mut out = BytesMut::new();
        for track in session.tracks.iter_mut().filter(|t| t.video == is_video) {
            for packet in track.packetizer.packetize(frame) {
                RtspMessage::Interleaved(InterleavedFrame {
                    channel: track.transport.rtp_channel,
                    payload: packet,
                })
                .encode(&mut out);
            }
        }
        if out.is_empty() {
            return Ok(());
        }
        if let Some(subscription) = &session.subscription {
            subscription.path().counters().record_output(out.len());
        }
        metrics::media::EGRESS_BYTES_TOTAL.inc_by(out.len() as u64);
        self.io.write_all(&out).await?;
        Ok(())
    }

    async fn write_message(&mut self, message: &RtspMessage) -> anyhow::Result<()> {
        self.io.write_all(&message.to_bytes()).await?;
        self.io.flush().await?;
        Ok(())
    }
}

/// Next frame of the playing subscription; pends forever while not
/// playing.
async fn next_frame(session: &mut Option<RtspSession>) -> Option<EgressFrame> {
    match session.as_mut().and_then(|s| s.subscription.as_mut()) {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

/// Split `cam/trackID=1` into the mount path and the track index.
fn split_control(path: &str) -> (String, Option<usize>) {
    match path.rsplit_once('/') {
        Some((base, last)) if last.starts_with("trackID=") => {
            (base.to_string(), track_id_from_uri(last))
        }
        _ if path.starts_with("trackID=") => (String::new(), track_id_from_uri(path)),
        _ => (path.to_string(), None),
    }
}
