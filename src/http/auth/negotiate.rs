//! Connection-oriented negotiation engines (NTLM, SPNEGO/Kerberos).
//!
//! Token generation for these schemes depends on platform security
//! libraries, so the client takes them as trait objects. The defaults
//! cover what can be done without one: the NTLM Type-1 opener and Type-2
//! parsing. Anything needing key material returns
//! [`NetError::Negotiation`].

use crate::base::neterror::NetError;
use crate::http::auth::realm::Realm;
use base64::{engine::general_purpose, Engine as _};

const NTLM_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

// NEGOTIATE_UNICODE | OEM | REQUEST_TARGET | NTLM | ALWAYS_SIGN |
// EXTENDED_SESSIONSECURITY | VERSION | 128 | 56
const TYPE1_FLAGS: u32 = 0xa208_8201;

/// Produces NTLM messages.
pub trait NtlmEngine: Send + Sync + 'static {
    /// Base64 Type-1 (negotiate) message.
    fn type1_message(&self) -> String;

    /// Base64 Type-3 (authenticate) message answering `challenge`, the
    /// base64 Type-2 message from the server.
    fn type3_message(
        &self,
        principal: &str,
        secret: &str,
        domain: Option<&str>,
        host: Option<&str>,
        challenge: &str,
    ) -> Result<String, NetError>;
}

/// Produces SPNEGO (`Negotiate`) tokens.
pub trait SpnegoEngine: Send + Sync + 'static {
    /// Base64 token for `host`, the request's virtual host or URL host.
    fn generate_token(&self, realm: &Realm, host: &str) -> Result<String, NetError>;
}

/// NTLM engine without key derivation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNtlmEngine;

impl NtlmEngine for DefaultNtlmEngine {
    fn type1_message(&self) -> String {
        let mut msg = Vec::with_capacity(40);
        msg.extend_from_slice(NTLM_SIGNATURE);
        msg.extend_from_slice(&1u32.to_le_bytes());
        msg.extend_from_slice(&TYPE1_FLAGS.to_le_bytes());
        // Empty domain and workstation security buffers, both at offset 40
        for _ in 0..2 {
            msg.extend_from_slice(&0u16.to_le_bytes());
            msg.extend_from_slice(&0u16.to_le_bytes());
            msg.extend_from_slice(&40u32.to_le_bytes());
        }
        // Version 5.1, build 2600, NTLM revision 15
        msg.extend_from_slice(&[5, 1]);
        msg.extend_from_slice(&2600u16.to_le_bytes());
        msg.extend_from_slice(&[0, 0, 0, 15]);
        general_purpose::STANDARD.encode(msg)
    }

    fn type3_message(
        &self,
        _principal: &str,
        _secret: &str,
        _domain: Option<&str>,
        _host: Option<&str>,
        challenge: &str,
    ) -> Result<String, NetError> {
        let type2 = Type2Message::parse(challenge)?;
        tracing::debug!(flags = type2.flags, "parsed NTLM challenge");
        Err(NetError::negotiation("NTLM Type-3 generation needs a configured engine"))
    }
}

/// SPNEGO engine used when none is configured. Always fails, which lets
/// the interceptor fall back to NTLM when the server offers it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableSpnegoEngine;

impl SpnegoEngine for UnavailableSpnegoEngine {
    fn generate_token(&self, _realm: &Realm, host: &str) -> Result<String, NetError> {
        Err(NetError::negotiation(format!("no SPNEGO engine configured for {}", host)))
    }
}

/// A decoded NTLM Type-2 (challenge) message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type2Message {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Type2Message {
    pub fn parse(challenge: &str) -> Result<Self, NetError> {
        let bytes = general_purpose::STANDARD
            .decode(challenge.trim())
            .map_err(|_| NetError::InvalidAuthChallenge)?;
        if bytes.len() < 32 || &bytes[..8] != NTLM_SIGNATURE || read_u32(&bytes, 8) != Some(2) {
            return Err(NetError::InvalidAuthChallenge);
        }
        let flags = read_u32(&bytes, 20).ok_or(NetError::InvalidAuthChallenge)?;
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&bytes[24..32]);

        // Target info buffer is optional (absent in very old servers)
        let target_info = match (read_u16(&bytes, 40), read_u32(&bytes, 44)) {
            (Some(len), Some(offset)) if len > 0 => {
                let start = offset as usize;
                let end = start + len as usize;
                bytes.get(start..end).ok_or(NetError::InvalidAuthChallenge)?.to_vec()
            }
            _ => Vec::new(),
        };

        Ok(Self { flags, server_challenge, target_info })
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    bytes.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    bytes.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type2(target_info: &[u8]) -> String {
        let mut msg = Vec::new();
        msg.extend_from_slice(NTLM_SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0u8; 8]); // target name buffer
        msg.extend_from_slice(&0x0000_8201u32.to_le_bytes());
        msg.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        msg.extend_from_slice(&[0u8; 8]); // reserved
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&(target_info.len() as u16).to_le_bytes());
        msg.extend_from_slice(&48u32.to_le_bytes());
        msg.extend_from_slice(target_info);
        general_purpose::STANDARD.encode(msg)
    }

    #[test]
    fn test_type1_matches_reference() {
        assert_eq!(
            DefaultNtlmEngine.type1_message(),
            "TlRMTVNTUAABAAAAAYIIogAAAAAoAAAAAAAAACgAAAAFASgKAAAADw=="
        );
    }

    #[test]
    fn test_parse_type2() {
        let msg = Type2Message::parse(&type2(b"\x02\x00\x00\x00")).unwrap();
        assert_eq!(msg.flags, 0x8201);
        assert_eq!(msg.server_challenge, [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(msg.target_info, vec![2, 0, 0, 0]);
    }

    #[test]
    fn test_parse_rejects_type1() {
        let err = Type2Message::parse(&DefaultNtlmEngine.type1_message()).unwrap_err();
        assert_eq!(err, NetError::InvalidAuthChallenge);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Type2Message::parse("not base64!").is_err());
        assert!(Type2Message::parse("AAAA").is_err());
    }

    #[test]
    fn test_default_type3_is_negotiation_error() {
        let err = DefaultNtlmEngine
            .type3_message("u", "p", None, None, &type2(b""))
            .unwrap_err();
        assert!(matches!(err, NetError::Negotiation(_)));
        assert!(err.is_fatal_auth());
    }

    #[test]
    fn test_unavailable_spnego() {
        let realm = Realm::builder(crate::http::auth::AuthScheme::Spnego, "u", "p").build();
        let err = UnavailableSpnegoEngine.generate_token(&realm, "example.com").unwrap_err();
        assert!(matches!(err, NetError::Negotiation(msg) if msg.contains("example.com")));
    }
}
