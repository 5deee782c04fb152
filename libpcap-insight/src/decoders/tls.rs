use super::{ApplicationDecoder, DecodeResult, L4Info};
use crate::layers::ApplicationLayer;
use nom::number::streaming::{be_u16, be_u8};
use nom::IResult;
use serde::Serialize;
use tls_parser::{
    parse_tls_extensions, parse_tls_plaintext, TlsCipherSuite, TlsExtension, TlsMessage,
    TlsMessageHandshake,
};
use tracing::trace;

const CONTENT_CHANGE_CIPHER_SPEC: u8 = 20;
const CONTENT_ALERT: u8 = 21;
const CONTENT_HANDSHAKE: u8 = 22;
const CONTENT_APPLICATION_DATA: u8 = 23;
const CONTENT_HEARTBEAT: u8 = 24;

/// Summary of the first TLS record of a segment
///
/// No key material is kept.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsLayer {
    pub content_type: u8,
    /// Record layer version
    pub version: u16,
    pub record_length: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_type: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_version: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_suite: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher_suite_name: Option<String>,
    /// Server name from the ClientHello
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sni: Option<String>,
}

impl TlsLayer {
    pub fn summary(&self) -> String {
        let mut s = match self.content_type {
            CONTENT_CHANGE_CIPHER_SPEC => "Change Cipher Spec".to_string(),
            CONTENT_ALERT => "Alert".to_string(),
            CONTENT_APPLICATION_DATA => "Application Data".to_string(),
            CONTENT_HEARTBEAT => "Heartbeat".to_string(),
            _ => match self.handshake_type {
                Some(1) => "Client Hello".to_string(),
                Some(2) => "Server Hello".to_string(),
                Some(11) if self.version < 0x0304 => "Certificate".to_string(),
                Some(16) => "Client Key Exchange".to_string(),
                _ => "Handshake".to_string(),
            },
        };
        if let Some(ref sni) = self.sni {
            s.push_str(&format!(" (SNI={})", sni));
        }
        if let Some(ref cipher) = self.cipher_suite_name {
            s.push_str(&format!(" ({})", cipher));
        }
        format!("{} {}", version_name(self.version), s)
    }
}

pub fn version_name(version: u16) -> String {
    match version {
        0x0300 => "SSLv3".to_string(),
        0x0301 => "TLSv1.0".to_string(),
        0x0302 => "TLSv1.1".to_string(),
        0x0303 => "TLSv1.2".to_string(),
        0x0304 => "TLSv1.3".to_string(),
        v => format!("TLS 0x{:04x}", v),
    }
}

struct RecordHeader {
    content_type: u8,
    version: u16,
    length: u16,
}

fn parse_record_header(i: &[u8]) -> IResult<&[u8], RecordHeader> {
    let (i, content_type) = be_u8(i)?;
    let (i, version) = be_u16(i)?;
    let (i, length) = be_u16(i)?;
    Ok((
        i,
        RecordHeader {
            content_type,
            version,
            length,
        },
    ))
}

fn find_sni(ext: &[u8]) -> Option<String> {
    let (_, extensions) = parse_tls_extensions(ext).ok()?;
    extensions.iter().find_map(|e| match e {
        TlsExtension::SNI(names) => names
            .first()
            .map(|(_, name)| String::from_utf8_lossy(name).into_owned()),
        _ => None,
    })
}

pub struct TlsDecoder;

impl ApplicationDecoder for TlsDecoder {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn probe(&self, _l4: &L4Info, payload: &[u8]) -> bool {
        payload.len() >= 5
            && (CONTENT_CHANGE_CIPHER_SPEC..=CONTENT_HEARTBEAT).contains(&payload[0])
            && payload[1] == 3
            && payload[2] <= 4
    }

    fn decode(&self, _l4: &L4Info, payload: &[u8]) -> DecodeResult {
        let (rest, hdr) =
            parse_record_header(payload).map_err(|_| "record header truncated".to_string())?;
        let mut tls = TlsLayer {
            content_type: hdr.content_type,
            version: hdr.version,
            record_length: hdr.length,
            handshake_type: None,
            client_version: None,
            server_version: None,
            cipher_suite: None,
            cipher_suite_name: None,
            sni: None,
        };
        if hdr.content_type == CONTENT_HANDSHAKE {
            tls.handshake_type = rest.first().copied();
            if rest.len() >= usize::from(hdr.length) {
                match parse_tls_plaintext(payload) {
                    Ok((_, record)) => {
                        for msg in &record.msg {
                            match msg {
                                TlsMessage::Handshake(TlsMessageHandshake::ClientHello(ch)) => {
                                    tls.client_version = Some(ch.version.0);
                                    tls.sni = ch.ext.and_then(find_sni);
                                }
                                TlsMessage::Handshake(TlsMessageHandshake::ServerHello(sh)) => {
                                    tls.server_version = Some(sh.version.0);
                                    tls.cipher_suite = Some(sh.cipher.0);
                                    tls.cipher_suite_name = TlsCipherSuite::from_id(sh.cipher.0)
                                        .map(|c| c.name.to_string());
                                }
                                _ => (),
                            }
                        }
                    }
                    // encrypted handshake messages do not parse
                    Err(e) => trace!("TLS handshake not decoded: {:?}", e),
                }
            }
        }
        Ok(Some(ApplicationLayer::Tls(tls)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal ClientHello record carrying a server_name extension
    fn client_hello(sni: &str) -> Vec<u8> {
        let name = sni.as_bytes();
        let mut sni_ext = Vec::new();
        // server_name_list
        let list_len = (name.len() + 3) as u16;
        sni_ext.extend_from_slice(&list_len.to_be_bytes());
        sni_ext.push(0); // host_name
        sni_ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
        sni_ext.extend_from_slice(name);
        let mut ext = Vec::new();
        ext.extend_from_slice(&[0, 0]); // server_name
        ext.extend_from_slice(&(sni_ext.len() as u16).to_be_bytes());
        ext.extend_from_slice(&sni_ext);

        let mut body = Vec::new();
        body.extend_from_slice(&[3, 3]); // client_version
        body.extend_from_slice(&[0x11; 32]); // random
        body.push(0); // session id
        body.extend_from_slice(&[0, 2, 0x13, 0x01]); // cipher suites
        body.extend_from_slice(&[1, 0]); // compression
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);

        let mut hs = vec![1];
        let len = body.len() as u32;
        hs.extend_from_slice(&len.to_be_bytes()[1..]);
        hs.extend_from_slice(&body);

        let mut record = vec![CONTENT_HANDSHAKE, 3, 1];
        record.extend_from_slice(&(hs.len() as u16).to_be_bytes());
        record.extend_from_slice(&hs);
        record
    }

    #[test]
    fn client_hello_sni() {
        let payload = client_hello("example.org");
        let l4 = L4Info::tcp(50123, 443);
        assert!(TlsDecoder.probe(&l4, &payload));
        let tls = match TlsDecoder.decode(&l4, &payload) {
            Ok(Some(ApplicationLayer::Tls(tls))) => tls,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(tls.handshake_type, Some(1));
        assert_eq!(tls.client_version, Some(0x0303));
        assert_eq!(tls.sni.as_deref(), Some("example.org"));
        assert_eq!(tls.summary(), "TLSv1.0 Client Hello (SNI=example.org)");
    }

    #[test]
    fn application_data_record() {
        let payload = [CONTENT_APPLICATION_DATA, 3, 3, 0, 4, 1, 2, 3, 4];
        let l4 = L4Info::tcp(443, 50123);
        match TlsDecoder.decode(&l4, &payload) {
            Ok(Some(ApplicationLayer::Tls(tls))) => {
                assert_eq!(tls.record_length, 4);
                assert_eq!(tls.handshake_type, None);
                assert_eq!(tls.summary(), "TLSv1.2 Application Data");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn probe_rejects_plain_text() {
        let l4 = L4Info::tcp(443, 50123);
        assert!(!TlsDecoder.probe(&l4, b"GET / HTTP/1.1\r\n"));
        assert!(!TlsDecoder.probe(&l4, &[22, 3]));
    }
}
