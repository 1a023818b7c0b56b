use super::errors::TransportError;

/// The negotiated transport of one track: RTP/AVP over the RTSP TCP
/// connection on a pair of interleaved channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterleavedTransport {
    pub rtp_channel: u8,
    pub rtcp_channel: u8,
}

impl InterleavedTransport {
    /// `Transport` response header value.
    #[must_use]
    pub fn header_value(&self, ssrc: u32) -> String {
        format!(
            "RTP/AVP/TCP;unicast;interleaved={}-{};ssrc={ssrc:08X}",
            self.rtp_channel, self.rtcp_channel
        )
    }
}

/// Pick the first TCP interleaved option from a `Transport` request header.
/// Clients that offer only UDP are refused; when the client does not name
/// channels, `default_rtp_channel` and the next channel are used.
pub fn negotiate(
    header: Option<&str>,
    default_rtp_channel: u8,
) -> Result<InterleavedTransport, TransportError> {
    let header = header.ok_or(TransportError::Missing)?;

    for spec in header.split(',') {
        let mut params = spec.split(';').map(str::trim);
        let protocol = params.next().unwrap_or_default();
        if !protocol.eq_ignore_ascii_case("RTP/AVP/TCP") {
            continue;
        }

        let mut transport = InterleavedTransport {
            rtp_channel: default_rtp_channel,
            rtcp_channel: default_rtp_channel.wrapping_add(1),
        };
        for param in params {
            let Some(value) = param.strip_prefix("interleaved=") else {
                continue;
            };
            let (rtp, rtcp) = match value.split_once('-') {
                Some((rtp, rtcp)) => (rtp, Some(rtcp)),
                None => (value, None),
            };
            transport.rtp_channel = rtp
                .parse()
                .map_err(|_| TransportError::Malformed(param.to_string()))?;
            transport.rtcp_channel = match rtcp {
                Some(rtcp) => rtcp
                    .parse()
                    .map_err(|_| TransportError::Malformed(param.to_string()))?,
                None => transport.rtp_channel.wrapping_add(1),
            };
        }
        return Ok(transport);
    }

    Err(TransportError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_interleaved() {
        let transport = negotiate(Some("RTP/AVP/TCP;unicast;interleaved=2-3"), 0).unwrap();
        assert_eq!(
            transport,
            InterleavedTransport {
                rtp_channel: 2,
                rtcp_channel: 3
            }
        );
        assert_eq!(
            transport.header_value(0xAB),
            "RTP/AVP/TCP;unicast;interleaved=2-3;ssrc=000000AB"
        );
    }

    #[test]
    fn test_defaults_channels_when_absent() {
        let transport = negotiate(Some("RTP/AVP/TCP;unicast"), 4).unwrap();
        assert_eq!(transport.rtp_channel, 4);
        assert_eq!(transport.rtcp_channel, 5);
    }

    #[test]
    fn test_picks_tcp_among_alternatives() {
        let header = "RTP/AVP;unicast;client_port=5000-5001,RTP/AVP/TCP;unicast;interleaved=0-1";
        assert_eq!(negotiate(Some(header), 0).unwrap().rtp_channel, 0);
    }

    #[test]
    fn test_udp_only_is_unsupported() {
        assert_eq!(
            negotiate(Some("RTP/AVP;unicast;client_port=5000-5001"), 0),
            Err(TransportError::Unsupported)
        );
        assert_eq!(negotiate(None, 0), Err(TransportError::Missing));
        assert!(matches!(
            negotiate(Some("RTP/AVP/TCP;interleaved=x-1"), 0),
            Err(TransportError::Malformed(_))
        ));
    }
}
