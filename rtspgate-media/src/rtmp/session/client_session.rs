use {
    super::{
        chunk_io::ChunkIo,
        errors::{SessionError, SessionErrorValue},
    },
    crate::{
        frame::MediaFrame,
        rtmp::{
            amf0::Amf0ValueType,
            define::{csid_type, msg_type_id},
            handshake,
            messages::RtmpMessage,
        },
    },
    tokio::io::{AsyncRead, AsyncWrite},
};

const CLIENT_CHUNK_SIZE: u32 = 4096;

/// Minimal publishing client: connect, createStream, publish, then push
/// frames. Used by tooling and loopback tests.
pub struct ClientSession<S> {
    conn: ChunkIo<S>,
    stream_id: u32,
    transaction_id: f64,
}

struct CommandReply {
    name: String,
    others: Vec<Amf0ValueType>,
}

impl<S> ClientSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub async fn publish(io: S, app_name: &str, stream_name: &str) -> Result<Self, SessionError> {
        let mut session = Self {
            conn: ChunkIo::new(io),
            stream_id: 0,
            transaction_id: 0.0,
        };
        handshake::client_handshake(session.conn.get_mut()).await?;

        let connect = session
            .call(
                "connect",
                Amf0ValueType::object([
                    ("app", Amf0ValueType::string(app_name)),
                    ("type", Amf0ValueType::string("nonprivate")),
                    (
                        "tcUrl",
                        Amf0ValueType::string(format!("rtmp://localhost/{app_name}")),
                    ),
                ]),
                &[],
            )
            .await?;
        if connect.name != "_result" {
            return Err(SessionErrorValue::UnexpectedResponse("connect".to_string()).into());
        }
        session.conn.set_chunk_size(CLIENT_CHUNK_SIZE).await?;

        let created = session
            .call("createStream", Amf0ValueType::Null, &[])
            .await?;
        session.stream_id = created
            .others
            .first()
            .and_then(Amf0ValueType::as_number)
            .ok_or_else(|| SessionErrorValue::UnexpectedResponse("createStream".to_string()))?
            as u32;

        let status = session
            .call(
                "publish",
                Amf0ValueType::Null,
                &[
                    Amf0ValueType::string(stream_name),
                    Amf0ValueType::string("live"),
                ],
            )
            .await?;
        let info = status
            .others
            .first()
            .and_then(Amf0ValueType::as_object)
            .cloned()
            .unwrap_or_default();
        let code = info.get("code").and_then(Amf0ValueType::as_str);
        if code != Some("NetStream.Publish.Start") {
            let description = info
                .get("description")
                .and_then(Amf0ValueType::as_str)
                .unwrap_or("publish refused")
                .to_string();
            return Err(SessionErrorValue::PublishRejected(description).into());
        }
        Ok(session)
    }

    async fn call(
        &mut self,
        command_name: &str,
        command_object: Amf0ValueType,
        args: &[Amf0ValueType],
    ) -> Result<CommandReply, SessionError> {
        self.transaction_id += 1.0;
        let mut values = vec![
            Amf0ValueType::string(command_name),
            Amf0ValueType::Number(self.transaction_id),
            command_object,
        ];
        values.extend_from_slice(args);
        self.conn
            .write_command(csid_type::COMMAND_AMF0_AMF3, self.stream_id, &values)
            .await?;

        loop {
            let chunk = self
                .conn
                .read_chunk()
                .await?
                .ok_or(SessionErrorValue::ConnectionClosed)?;
            if let RtmpMessage::Amf0Command {
                command_name,
                others,
                ..
            } = RtmpMessage::parse(chunk)?
            {
                if matches!(command_name.as_str(), "_result" | "_error" | "onStatus") {
                    return Ok(CommandReply {
                        name: command_name,
                        others,
                    });
                }
            }
        }
    }

    pub async fn send_frame(&mut self, frame: &MediaFrame) -> Result<(), SessionError> {
        let (csid, type_id) = match frame {
            MediaFrame::Video { .. } => (csid_type::VIDEO, msg_type_id::VIDEO),
            MediaFrame::Audio { .. } => (csid_type::AUDIO, msg_type_id::AUDIO),
            MediaFrame::MetaData { .. } => (csid_type::DATA_AMF0_AMF3, msg_type_id::DATA_AMF0),
        };
        self.conn
            .write_message(csid, type_id, self.stream_id, frame.timestamp(), frame.data())
            .await
    }

    pub async fn unpublish(mut self) -> Result<(), SessionError> {
        let values = [
            Amf0ValueType::string("deleteStream"),
            Amf0ValueType::Number(self.transaction_id + 1.0),
            Amf0ValueType::Null,
            Amf0ValueType::Number(f64::from(self.stream_id)),
        ];
        self.conn
            .write_command(csid_type::COMMAND_AMF0_AMF3, 0, &values)
            .await?;
        self.conn.shutdown().await;
        Ok(())
    }
}
