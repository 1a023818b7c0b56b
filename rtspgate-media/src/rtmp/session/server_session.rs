use {
    super::{
        chunk_io::ChunkIo,
        errors::{SessionError, SessionErrorValue},
        MediaSink, PublishHandler,
    },
    crate::{
        frame::MediaFrame,
        rtmp::{
            amf0::Amf0ValueType,
            chunk::ChunkInfo,
            define::{self, csid_type, msg_type_id, peer_bandwidth_limit_type, user_control_event},
            handshake,
            messages::{control, RtmpMessage},
        },
    },
    std::sync::Arc,
    tokio::io::{AsyncRead, AsyncWrite},
};

/// Default chunk size the server switches to right after `connect`.
pub const DEFAULT_CHUNK_SIZE: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Finish,
}

/// One publishing connection, from handshake to `deleteStream` or EOF.
pub struct ServerSession<S> {
    conn: ChunkIo<S>,
    handler: Arc<dyn PublishHandler>,
    pub app_name: String,
    pub stream_name: String,
    sink: Option<Box<dyn MediaSink>>,
    chunk_size: u32,
}

impl<S> ServerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(io: S, handler: Arc<dyn PublishHandler>) -> Self {
        Self {
            conn: ChunkIo::new(io),
            handler,
            app_name: String::new(),
            stream_name: String::new(),
            sink: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Outgoing chunk size announced after `connect`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn bytes_received(&self) -> u64 {
        self.conn.bytes_received()
    }

    #[must_use]
    pub const fn is_publishing(&self) -> bool {
        self.sink.is_some()
    }

    /// Drive the connection. Returns `Ok` when the publisher unpublishes or
    /// disconnects, or when the sink stops accepting frames.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        handshake::server_handshake(self.conn.get_mut()).await?;

        while let Some(chunk) = self.conn.read_chunk().await? {
            if self.process_chunk(chunk).await? == Flow::Finish {
                break;
            }
        }

        if self.sink.take().is_some() {
            tracing::info!(
                app_name = %self.app_name,
                stream_name = %self.stream_name,
                "Publisher finished"
            );
        }
        self.conn.shutdown().await;
        Ok(())
    }

    async fn process_chunk(&mut self, chunk: ChunkInfo) -> Result<Flow, SessionError> {
        let header = chunk.message_header;
        let timestamp = header.timestamp;
        let frame = match header.msg_type_id {
            msg_type_id::AUDIO => MediaFrame::Audio {
                timestamp,
                data: chunk.payload.freeze(),
            },
            msg_type_id::VIDEO => MediaFrame::Video {
                timestamp,
                data: chunk.payload.freeze(),
            },
            msg_type_id::DATA_AMF0 => MediaFrame::MetaData {
                timestamp,
                data: chunk.payload.freeze(),
            },
            _ => return self.process_message(chunk).await,
        };
        Ok(self.forward(frame).await)
    }

    async fn process_message(&mut self, chunk: ChunkInfo) -> Result<Flow, SessionError> {
        match RtmpMessage::parse(chunk)? {
            RtmpMessage::Amf0Command {
                command_name,
                transaction_id,
                command_object,
                others,
            } => {
                self.on_command(&command_name, transaction_id, &command_object, &others)
                    .await
            }
            RtmpMessage::Unknown { msg_type_id } => {
                tracing::trace!(msg_type_id, "ignoring unsupported message");
                Ok(Flow::Continue)
            }
            _ => Ok(Flow::Continue),
        }
    }

    async fn forward(&mut self, frame: MediaFrame) -> Flow {
        let Some(sink) = self.sink.as_mut() else {
            // media before publish has nowhere to go
            return Flow::Continue;
        };
        if sink.push(frame).await {
            Flow::Continue
        } else {
            tracing::info!(
                app_name = %self.app_name,
                stream_name = %self.stream_name,
                "Sink closed, dropping publisher"
            );
            Flow::Finish
        }
    }

    async fn on_command(
        &mut self,
        command_name: &str,
        transaction_id: f64,
        command_object: &Amf0ValueType,
        others: &[Amf0ValueType],
    ) -> Result<Flow, SessionError> {
        tracing::trace!(command_name, transaction_id, "rtmp command");
        match command_name {
            "connect" => {
                self.on_connect(transaction_id, command_object).await?;
            }
            "releaseStream" | "FCPublish" => {
                self.conn
                    .write_command(
                        csid_type::COMMAND_AMF0_AMF3,
                        0,
                        &[
                            Amf0ValueType::string("_result"),
                            Amf0ValueType::Number(transaction_id),
                            Amf0ValueType::Null,
                        ],
                    )
                    .await?;
            }
            "createStream" => {
                self.conn
                    .write_command(
                        csid_type::COMMAND_AMF0_AMF3,
                        0,
                        &[
                            Amf0ValueType::string("_result"),
                            Amf0ValueType::Number(transaction_id),
                            Amf0ValueType::Null,
                            Amf0ValueType::Number(f64::from(define::PUBLISH_STREAM_ID)),
                        ],
                    )
                    .await?;
            }
            "publish" => {
                self.on_publish(others).await?;
            }
            "deleteStream" | "FCUnpublish" | "closeStream" => {
                if self.sink.is_some() {
                    return Ok(Flow::Finish);
                }
            }
            _ => {
                tracing::trace!(command_name, "ignoring command");
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_connect(
        &mut self,
        transaction_id: f64,
        command_object: &Amf0ValueType,
    ) -> Result<(), SessionError> {
        self.app_name = command_object
            .as_object()
            .and_then(|obj| obj.get("app"))
            .and_then(Amf0ValueType::as_str)
            .map(|app| app.trim_matches('/').to_string())
            .ok_or(SessionErrorValue::NoAppName)?;

        self.conn
            .write_message(
                csid_type::PROTOCOL_USER_CONTROL,
                msg_type_id::WIN_ACKNOWLEDGEMENT_SIZE,
                0,
                0,
                &control::window_acknowledgement_size(define::WINDOW_ACKNOWLEDGEMENT_SIZE),
            )
            .await?;
        self.conn
            .write_message(
                csid_type::PROTOCOL_USER_CONTROL,
                msg_type_id::SET_PEER_BANDWIDTH,
                0,
                0,
                &control::set_peer_bandwidth(
                    define::PEER_BANDWIDTH,
                    peer_bandwidth_limit_type::DYNAMIC,
                ),
            )
            .await?;
        self.conn.set_chunk_size(self.chunk_size).await?;

        self.conn
            .write_command(
                csid_type::COMMAND_AMF0_AMF3,
                0,
                &[
                    Amf0ValueType::string("_result"),
                    Amf0ValueType::Number(transaction_id),
                    Amf0ValueType::object([
                        ("fmsVer", Amf0ValueType::string("FMS/3,0,1,123")),
                        ("capabilities", Amf0ValueType::Number(31.0)),
                    ]),
                    Amf0ValueType::object([
                        ("level", Amf0ValueType::string("status")),
                        ("code", Amf0ValueType::string("NetConnection.Connect.Success")),
                        ("description", Amf0ValueType::string("Connection succeeded.")),
                        ("objectEncoding", Amf0ValueType::Number(0.0)),
                    ]),
                ],
            )
            .await?;
        tracing::debug!(app_name = %self.app_name, "rtmp connect");
        Ok(())
    }

    async fn on_publish(&mut self, others: &[Amf0ValueType]) -> Result<(), SessionError> {
        if self.app_name.is_empty() {
            return Err(SessionErrorValue::NoAppName.into());
        }
        let raw_name = others
            .first()
            .and_then(Amf0ValueType::as_str)
            .ok_or(SessionErrorValue::NoStreamName)?;
        // tokens and other parameters ride along as `?query`
        let stream_name = raw_name.split('?').next().unwrap_or_default().to_string();
        if stream_name.is_empty() {
            return Err(SessionErrorValue::NoStreamName.into());
        }
        self.stream_name = stream_name;

        match self
            .handler
            .on_publish(&self.app_name, &self.stream_name)
            .await
        {
            Ok(sink) => {
                self.sink = Some(sink);
                self.conn
                    .write_user_control(
                        user_control_event::STREAM_BEGIN,
                        define::PUBLISH_STREAM_ID,
                    )
                    .await?;
                self.write_status(
                    "status",
                    "NetStream.Publish.Start",
                    &format!("{} is now published.", self.stream_name),
                )
                .await?;
                tracing::info!(
                    app_name = %self.app_name,
                    stream_name = %self.stream_name,
                    "Publish started"
                );
                Ok(())
            }
            Err(rejected) => {
                tracing::warn!(
                    app_name = %self.app_name,
                    stream_name = %self.stream_name,
                    reason = %rejected,
                    "Publish rejected"
                );
                self.write_status("error", "NetStream.Publish.BadName", &rejected.reason)
                    .await?;
                Err(SessionErrorValue::PublishRejected(rejected.reason).into())
            }
        }
    }

    async fn write_status(
        &mut self,
        level: &str,
        code: &str,
        description: &str,
    ) -> Result<(), SessionError> {
        self.conn
            .write_command(
                csid_type::DATA_AMF0_AMF3,
                define::PUBLISH_STREAM_ID,
                &[
                    Amf0ValueType::string("onStatus"),
                    Amf0ValueType::Number(0.0),
                    Amf0ValueType::Null,
                    Amf0ValueType::object([
                        ("level", Amf0ValueType::string(level)),
                        ("code", Amf0ValueType::string(code)),
                        ("description", Amf0ValueType::string(description)),
                    ]),
                ],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::session::{client_session::ClientSession, PublishRejected};
    use async_trait::async_trait;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    struct ChannelSink(mpsc::UnboundedSender<MediaFrame>);

    #[async_trait]
    impl MediaSink for ChannelSink {
        async fn push(&mut self, frame: MediaFrame) -> bool {
            self.0.send(frame).is_ok()
        }
    }

    struct TestHandler {
        accept: &'static str,
        frames: mpsc::UnboundedSender<MediaFrame>,
    }

    #[async_trait]
    impl PublishHandler for TestHandler {
        async fn on_publish(
            &self,
            app_name: &str,
            stream_name: &str,
        ) -> Result<Box<dyn MediaSink>, PublishRejected> {
            if format!("{app_name}/{stream_name}") == self.accept {
                Ok(Box::new(ChannelSink(self.frames.clone())))
            } else {
                Err(PublishRejected::new("no session for this path"))
            }
        }
    }

    fn spawn_server(
        accept: &'static str,
    ) -> (
        tokio::io::DuplexStream,
        mpsc::UnboundedReceiver<MediaFrame>,
        tokio::task::JoinHandle<Result<(), SessionError>>,
    ) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(TestHandler { accept, frames: tx });
        let task = tokio::spawn(async move { ServerSession::new(server, handler).run().await });
        (client, rx, task)
    }

    #[tokio::test]
    async fn test_publish_forwards_media() {
        let (io, mut frames, task) = spawn_server("live/cam1");

        let mut client = ClientSession::publish(io, "live", "cam1?token=abc").await.unwrap();
        let video = MediaFrame::Video {
            timestamp: 40,
            data: Bytes::from(vec![0x17, 0x01, 0, 0, 0, 0, 0, 0, 1, 0x65]),
        };
        client.send_frame(&video).await.unwrap();
        let big_audio = MediaFrame::Audio {
            timestamp: 64,
            data: Bytes::from(vec![0xAF; 6000]),
        };
        client.send_frame(&big_audio).await.unwrap();

        let metadata = MediaFrame::MetaData {
            timestamp: 0,
            data: Bytes::from_static(b"\x02\x00\x0aonMetaData"),
        };
        client.send_frame(&metadata).await.unwrap();

        assert_eq!(frames.recv().await.unwrap(), video);
        assert_eq!(frames.recv().await.unwrap(), big_audio);
        assert_eq!(frames.recv().await.unwrap(), metadata);

        client.unpublish().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(frames.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_publish_to_unknown_path_is_rejected() {
        let (io, _frames, task) = spawn_server("live/cam1");

        let err = ClientSession::publish(io, "live", "other").await.err().unwrap();
        assert!(matches!(err.value, SessionErrorValue::PublishRejected(ref reason) if reason.contains("no session")));

        let server_err = task.await.unwrap().unwrap_err();
        assert!(matches!(server_err.value, SessionErrorValue::PublishRejected(_)));
    }

    #[tokio::test]
    async fn test_disconnect_ends_session() {
        let (io, mut frames, task) = spawn_server("live/cam1");
        let client = ClientSession::publish(io, "live", "cam1").await.unwrap();
        drop(client);

        task.await.unwrap().unwrap();
        assert!(frames.recv().await.is_none());
    }
}
