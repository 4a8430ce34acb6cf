//! NTLMv2 authentication and session security for WinRM over plain HTTP.
//!
//! The handshake is NEGOTIATE, CHALLENGE, AUTHENTICATE with a random
//! exported session key. After it every SOAP body is sealed with RC4 and
//! signed with HMAC-MD5, each direction with its own keys and sequence
//! counter.

use chrono::Utc;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use thiserror::Error;

use crate::error::ActionError;

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_SIGN: u32 = 0x0000_0010;
const NEGOTIATE_SEAL: u32 = 0x0000_0020;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_VERSION: u32 = 0x0200_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_KEY_EXCH: u32 = 0x4000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_SIGN
    | NEGOTIATE_SEAL
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_VERSION
    | NEGOTIATE_128
    | NEGOTIATE_KEY_EXCH
    | NEGOTIATE_56;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";
/// Windows 6.1 build 7601, NTLM revision 15.
const VERSION: [u8; 8] = [6, 1, 0xb1, 0x1d, 0, 0, 0, 15];
const AUTHENTICATE_HEADER_LEN: usize = 72;

const AV_EOL: u16 = 0;
const AV_TIMESTAMP: u16 = 7;

const CLIENT_SIGNING: &[u8] = b"session key to client-to-server signing key magic constant\0";
const SERVER_SIGNING: &[u8] = b"session key to server-to-client signing key magic constant\0";
const CLIENT_SEALING: &[u8] = b"session key to client-to-server sealing key magic constant\0";
const SERVER_SEALING: &[u8] = b"session key to server-to-client sealing key magic constant\0";

/// Seconds between 1601-01-01 (FILETIME epoch) and the Unix epoch.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

#[derive(Debug, Error)]
pub enum NtlmError {
    #[error("malformed NTLM message: {0}")]
    Malformed(String),

    #[error("server did not agree to 128-bit message sealing")]
    WeakSession,

    #[error("NTLM message signature does not verify")]
    BadSignature,

    #[error("NTLM key setup failed: {0}")]
    Crypto(String),
}

impl From<NtlmError> for ActionError {
    fn from(e: NtlmError) -> Self {
        ActionError::transport(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub domain: String,
    pub user: String,
    password: String,
}

impl Credentials {
    /// `DOMAIN\user` carries its domain. A bare name or a `user@domain` UPN is
    /// sent whole with an empty domain, which the server resolves itself.
    pub fn new(username: &str, password: &str) -> Self {
        let (domain, user) = match username.split_once('\\') {
            Some((domain, user)) => (domain.to_string(), user.to_string()),
            None => (String::new(), username.to_string()),
        };
        Self {
            domain,
            user,
            password: password.to_string(),
        }
    }
}

/// Type 1 message: our capabilities, no domain or workstation.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(40);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    msg.extend_from_slice(&[0u8; 16]);
    msg.extend_from_slice(&VERSION);
    msg
}

/// The server's type 2 message.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    pub fn parse(msg: &[u8]) -> Result<Self, NtlmError> {
        check_header(msg, 2)?;
        if msg.len() < 48 {
            return Err(NtlmError::Malformed(format!(
                "challenge is {} bytes, expected at least 48",
                msg.len()
            )));
        }
        let flags = read_u32(msg, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&msg[24..32]);
        let target_info = if flags & NEGOTIATE_TARGET_INFO != 0 {
            field(msg, 40)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// MsvAvTimestamp from the target info, if the server sent one.
    fn timestamp(&self) -> Option<[u8; 8]> {
        let mut rest = self.target_info.as_slice();
        while rest.len() >= 4 {
            let id = u16::from_le_bytes([rest[0], rest[1]]);
            let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
            if id == AV_EOL || rest.len() < 4 + len {
                break;
            }
            if id == AV_TIMESTAMP && len == 8 {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(&rest[4..12]);
                return Some(ts);
            }
            rest = &rest[4 + len..];
        }
        None
    }
}

/// Type 3 message plus the session security it establishes.
pub struct Authentication {
    pub message: Vec<u8>,
    pub security: SessionSecurity,
}

/// Answer `challenge` for `creds`.
///
/// `client_challenge` and `exported_session_key` must be fresh random bytes;
/// `now` is a FILETIME used when the server sends no timestamp of its own.
pub fn authenticate(
    creds: &Credentials,
    challenge: &Challenge,
    client_challenge: [u8; 8],
    exported_session_key: [u8; 16],
    now: u64,
) -> Result<Authentication, NtlmError> {
    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;
    if flags & (NEGOTIATE_128 | NEGOTIATE_SEAL | NEGOTIATE_EXTENDED_SESSIONSECURITY)
        != NEGOTIATE_128 | NEGOTIATE_SEAL | NEGOTIATE_EXTENDED_SESSIONSECURITY
    {
        return Err(NtlmError::WeakSession);
    }

    let response_key = ntowf_v2(creds)?;
    let server_timestamp = challenge.timestamp();
    let blob = client_blob(
        server_timestamp.unwrap_or_else(|| now.to_le_bytes()),
        client_challenge,
        &challenge.target_info,
    );

    let nt_proof = hmac_md5(&response_key, &[&challenge.server_challenge, &blob])?;
    let mut nt_response = nt_proof.to_vec();
    nt_response.extend_from_slice(&blob);

    // with a server timestamp the LMv2 response is replaced by zeros
    let lm_response = match server_timestamp {
        Some(_) => vec![0u8; 24],
        None => {
            let mut lm =
                hmac_md5(&response_key, &[&challenge.server_challenge, &client_challenge])?
                    .to_vec();
            lm.extend_from_slice(&client_challenge);
            lm
        }
    };

    let session_base_key = hmac_md5(&response_key, &[&nt_proof])?;
    let (exported, encrypted_key) = if flags & NEGOTIATE_KEY_EXCH != 0 {
        let mut encrypted = exported_session_key;
        rc4(&session_base_key)?.apply_keystream(&mut encrypted);
        (exported_session_key, encrypted.to_vec())
    } else {
        (session_base_key, Vec::new())
    };

    let domain = utf16le(&creds.domain);
    let user = utf16le(&creds.user);
    let message = authenticate_message(
        flags,
        [&lm_response, &nt_response, &domain, &user, &[], &encrypted_key],
    );

    Ok(Authentication {
        message,
        security: SessionSecurity::client(&exported, flags)?,
    })
}

/// Current time as a Windows FILETIME (100ns ticks since 1601).
pub fn filetime_now() -> u64 {
    let now = Utc::now();
    let secs = (now.timestamp() + FILETIME_UNIX_OFFSET).max(0) as u64;
    secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100)
}

/// Payloads in field order: LM, NT, domain, user, workstation, session key.
fn authenticate_message(flags: u32, payloads: [&[u8]; 6]) -> Vec<u8> {
    let total: usize = payloads.iter().map(|p| p.len()).sum();
    let mut msg = Vec::with_capacity(AUTHENTICATE_HEADER_LEN + total);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());

    let mut offset = AUTHENTICATE_HEADER_LEN;
    for payload in &payloads {
        let len = payload.len() as u16;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += payload.len();
    }
    msg.extend_from_slice(&flags.to_le_bytes());
    msg.extend_from_slice(&VERSION);

    for payload in &payloads {
        msg.extend_from_slice(payload);
    }
    msg
}

fn client_blob(timestamp: [u8; 8], client_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp);
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

fn ntowf_v2(creds: &Credentials) -> Result<[u8; 16], NtlmError> {
    let nt_hash = Md4::digest(utf16le(&creds.password));
    let identity = format!("{}{}", creds.user.to_uppercase(), creds.domain);
    hmac_md5(&nt_hash, &[&utf16le(&identity)])
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<[u8; 16], NtlmError> {
    let mut mac = <Hmac<Md5> as Mac>::new_from_slice(key)
        .map_err(|e| NtlmError::Crypto(e.to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(block(&mac.finalize().into_bytes()))
}

fn rc4(key: &[u8; 16]) -> Result<Rc4<U16>, NtlmError> {
    <Rc4<U16> as KeyInit>::new_from_slice(key).map_err(|e| NtlmError::Crypto(e.to_string()))
}

fn block(bytes: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&bytes[..16]);
    out
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn check_header(msg: &[u8], kind: u32) -> Result<(), NtlmError> {
    if msg.len() < 12 || &msg[..8] != SIGNATURE {
        return Err(NtlmError::Malformed("missing NTLMSSP signature".to_string()));
    }
    let found = read_u32(msg, 8);
    if found != kind {
        return Err(NtlmError::Malformed(format!(
            "expected message type {}, got {}",
            kind, found
        )));
    }
    Ok(())
}

fn read_u32(msg: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([msg[at], msg[at + 1], msg[at + 2], msg[at + 3]])
}

/// Payload named by the (length, capacity, offset) descriptor at `at`.
fn field(msg: &[u8], at: usize) -> Result<&[u8], NtlmError> {
    if msg.len() < at + 8 {
        return Err(NtlmError::Malformed(format!("truncated field at {}", at)));
    }
    let len = u16::from_le_bytes([msg[at], msg[at + 1]]) as usize;
    let offset = read_u32(msg, at + 4) as usize;
    msg.get(offset..offset + len)
        .ok_or_else(|| NtlmError::Malformed(format!("field at {} points past the end", at)))
}

// ── Session security ───────────────────────────────────────

struct Direction {
    sign_key: [u8; 16],
    cipher: Rc4<U16>,
    seq: u32,
}

impl Direction {
    fn new(exported: &[u8; 16], sign_magic: &[u8], seal_magic: &[u8]) -> Result<Self, NtlmError> {
        let sign_key = block(&Md5::digest([exported.as_slice(), sign_magic].concat()));
        let seal_key = block(&Md5::digest([exported.as_slice(), seal_magic].concat()));
        Ok(Self {
            sign_key,
            cipher: rc4(&seal_key)?,
            seq: 0,
        })
    }

    /// Version 1 signature over `plaintext`; advances the sequence number.
    /// Must run after the message itself went through the cipher.
    fn signature(&mut self, plaintext: &[u8], key_exchange: bool) -> Result<[u8; 16], NtlmError> {
        let seq = self.seq.to_le_bytes();
        let mut checksum = [0u8; 8];
        checksum.copy_from_slice(&hmac_md5(&self.sign_key, &[&seq, plaintext])?[..8]);
        if key_exchange {
            self.cipher.apply_keystream(&mut checksum);
        }

        let mut signature = [0u8; 16];
        signature[..4].copy_from_slice(&1u32.to_le_bytes());
        signature[4..12].copy_from_slice(&checksum);
        signature[12..].copy_from_slice(&seq);
        self.seq = self.seq.wrapping_add(1);
        Ok(signature)
    }
}

/// Per-connection sealing state. Messages must be sealed and unsealed in
/// the order they travel.
pub struct SessionSecurity {
    key_exchange: bool,
    outbound: Direction,
    inbound: Direction,
}

impl SessionSecurity {
    fn client(exported: &[u8; 16], flags: u32) -> Result<Self, NtlmError> {
        Ok(Self {
            key_exchange: flags & NEGOTIATE_KEY_EXCH != 0,
            outbound: Direction::new(exported, CLIENT_SIGNING, CLIENT_SEALING)?,
            inbound: Direction::new(exported, SERVER_SIGNING, SERVER_SEALING)?,
        })
    }

    /// Encrypt `message` in place and return its signature.
    pub fn seal(&mut self, message: &mut [u8]) -> Result<[u8; 16], NtlmError> {
        let plaintext = message.to_vec();
        self.outbound.cipher.apply_keystream(message);
        self.outbound.signature(&plaintext, self.key_exchange)
    }

    /// Decrypt `message` in place and check it against `signature`.
    pub fn unseal(&mut self, signature: &[u8], message: &mut [u8]) -> Result<(), NtlmError> {
        if signature.len() != 16 {
            return Err(NtlmError::Malformed(format!(
                "signature is {} bytes, expected 16",
                signature.len()
            )));
        }
        self.inbound.cipher.apply_keystream(message);
        let expected = self.inbound.signature(message, self.key_exchange)?;
        if expected[..] != signature[..] {
            return Err(NtlmError::BadSignature);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod acceptor {
    //! Server half of the handshake, for fake WinRM listeners in tests.

    use super::*;

    /// Type 2 message offering everything we ask for.
    pub fn challenge_message(server_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
        const HEADER: u32 = 56;
        let len = target_info.len() as u16;
        let mut msg = Vec::new();
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        msg.extend_from_slice(&[0, 0, 0, 0]);
        msg.extend_from_slice(&HEADER.to_le_bytes());
        msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
        msg.extend_from_slice(&server_challenge);
        msg.extend_from_slice(&[0u8; 8]);
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&HEADER.to_le_bytes());
        msg.extend_from_slice(&VERSION);
        msg.extend_from_slice(target_info);
        msg
    }

    /// Verify a type 3 message against the known credentials.
    pub fn accept(
        creds: &Credentials,
        server_challenge: [u8; 8],
        msg: &[u8],
    ) -> Result<SessionSecurity, NtlmError> {
        check_header(msg, 3)?;
        if msg.len() < AUTHENTICATE_HEADER_LEN {
            return Err(NtlmError::Malformed("short authenticate message".to_string()));
        }
        let nt_response = field(msg, 20)?;
        let domain = utf16_string(field(msg, 28)?);
        let user = utf16_string(field(msg, 36)?);
        let encrypted_key = field(msg, 52)?;
        let flags = read_u32(msg, 60);

        if user != creds.user || domain != creds.domain || nt_response.len() < 16 {
            return Err(NtlmError::BadSignature);
        }
        let response_key = ntowf_v2(creds)?;
        let proof = hmac_md5(&response_key, &[&server_challenge, &nt_response[16..]])?;
        if proof[..] != nt_response[..16] {
            return Err(NtlmError::BadSignature);
        }

        let session_base_key = hmac_md5(&response_key, &[&proof])?;
        let exported = if flags & NEGOTIATE_KEY_EXCH != 0 {
            if encrypted_key.len() != 16 {
                return Err(NtlmError::Malformed("session key is not 16 bytes".to_string()));
            }
            let mut key = block(encrypted_key);
            rc4(&session_base_key)?.apply_keystream(&mut key);
            key
        } else {
            session_base_key
        };

        Ok(SessionSecurity {
            key_exchange: flags & NEGOTIATE_KEY_EXCH != 0,
            outbound: Direction::new(&exported, SERVER_SIGNING, SERVER_SEALING)?,
            inbound: Direction::new(&exported, CLIENT_SIGNING, CLIENT_SEALING)?,
        })
    }

    fn utf16_string(bytes: &[u8]) -> String {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    }
}

#[cfg(test)]
mod tests {
    use super::acceptor;
    use super::*;

    // Worked NTLMv2 example from MS-NLMP 4.2.4.
    const SERVER_CHALLENGE: [u8; 8] = [0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef];
    const CLIENT_CHALLENGE: [u8; 8] = [0xaa; 8];
    const RANDOM_SESSION_KEY: [u8; 16] = [0x55; 16];

    fn reference_creds() -> Credentials {
        Credentials::new("Domain\\User", "Password")
    }

    fn reference_challenge() -> Challenge {
        let mut target_info = Vec::new();
        for (id, value) in [(2u16, "Domain"), (1u16, "Server")] {
            let value = utf16le(value);
            target_info.extend_from_slice(&id.to_le_bytes());
            target_info.extend_from_slice(&(value.len() as u16).to_le_bytes());
            target_info.extend_from_slice(&value);
        }
        target_info.extend_from_slice(&[0, 0, 0, 0]);
        Challenge {
            flags: 0xe28a_8233,
            server_challenge: SERVER_CHALLENGE,
            target_info,
        }
    }

    fn reference_authentication() -> Authentication {
        authenticate(
            &reference_creds(),
            &reference_challenge(),
            CLIENT_CHALLENGE,
            RANDOM_SESSION_KEY,
            0,
        )
        .unwrap()
    }

    #[test]
    fn domain_is_split_from_down_level_names() {
        let creds = Credentials::new("LAB\\admin", "pw");
        assert_eq!((creds.domain.as_str(), creds.user.as_str()), ("LAB", "admin"));
        let creds = Credentials::new("admin@lab.local", "pw");
        assert_eq!((creds.domain.as_str(), creds.user.as_str()), ("", "admin@lab.local"));
    }

    #[test]
    fn response_key_matches_reference() {
        assert_eq!(
            hex::encode(ntowf_v2(&reference_creds()).unwrap()),
            "0c868a403bfd7a93a3001ef22ef02e3f"
        );
    }

    #[test]
    fn authenticate_message_matches_reference() {
        let msg = reference_authentication().message;
        assert_eq!(&msg[..8], SIGNATURE);
        assert_eq!(read_u32(&msg, 8), 3);

        let lm = field(&msg, 12).unwrap();
        assert_eq!(
            hex::encode(lm),
            "86c35097ac9cec102554764a57cccc19aaaaaaaaaaaaaaaa"
        );
        let nt = field(&msg, 20).unwrap();
        assert_eq!(hex::encode(&nt[..16]), "68cd0ab851e51c96aabc927bebef6a1c");
        assert_eq!(field(&msg, 28).unwrap(), utf16le("Domain").as_slice());
        assert_eq!(field(&msg, 36).unwrap(), utf16le("User").as_slice());
        assert_eq!(
            hex::encode(field(&msg, 52).unwrap()),
            "c5dad2544fc9799094ce1ce90bc9d03e"
        );
    }

    #[test]
    fn sealing_matches_reference() {
        let mut security = reference_authentication().security;
        let mut message = utf16le("Plaintext");
        let signature = security.seal(&mut message).unwrap();
        assert_eq!(hex::encode(&message), "54e50165bf1936dc996020c1811b0f06fb5f");
        assert_eq!(hex::encode(signature), "010000007fb38ec5c55d497600000000");
    }

    #[test]
    fn server_timestamp_replaces_lm_response() {
        let mut challenge = reference_challenge();
        let mut target_info = vec![7, 0, 8, 0];
        target_info.extend_from_slice(&42u64.to_le_bytes());
        target_info.extend_from_slice(&challenge.target_info);
        challenge.target_info = target_info;

        let msg = authenticate(&reference_creds(), &challenge, CLIENT_CHALLENGE, RANDOM_SESSION_KEY, 7)
            .unwrap()
            .message;
        assert_eq!(field(&msg, 12).unwrap(), [0u8; 24].as_slice());
        // blob timestamp sits after the 16-byte proof and 8-byte blob header
        let nt = field(&msg, 20).unwrap();
        assert_eq!(&nt[24..32], 42u64.to_le_bytes().as_slice());
    }

    #[test]
    fn challenge_round_trips_through_parser() {
        let raw = acceptor::challenge_message(SERVER_CHALLENGE, &[0, 0, 0, 0]);
        let challenge = Challenge::parse(&raw).unwrap();
        assert_eq!(challenge.server_challenge, SERVER_CHALLENGE);
        assert_eq!(challenge.flags, CLIENT_FLAGS);
        assert_eq!(challenge.target_info, [0, 0, 0, 0]);
    }

    #[test]
    fn garbage_is_not_a_challenge() {
        assert!(matches!(
            Challenge::parse(b"HTTP/1.1 401"),
            Err(NtlmError::Malformed(_))
        ));
        assert!(matches!(
            Challenge::parse(&negotiate_message()),
            Err(NtlmError::Malformed(_))
        ));
    }

    #[test]
    fn weak_server_is_refused() {
        let mut challenge = reference_challenge();
        challenge.flags &= !NEGOTIATE_128;
        assert!(matches!(
            authenticate(&reference_creds(), &challenge, CLIENT_CHALLENGE, RANDOM_SESSION_KEY, 0),
            Err(NtlmError::WeakSession)
        ));
    }

    fn handshake(server_password: &str) -> Result<(SessionSecurity, SessionSecurity), NtlmError> {
        let raw = acceptor::challenge_message(SERVER_CHALLENGE, &[0, 0, 0, 0]);
        let challenge = Challenge::parse(&raw)?;
        let client = authenticate(
            &Credentials::new("LAB\\admin", "s3cret"),
            &challenge,
            [7; 8],
            [9; 16],
            filetime_now(),
        )?;
        let server = acceptor::accept(
            &Credentials::new("LAB\\admin", server_password),
            SERVER_CHALLENGE,
            &client.message,
        )?;
        Ok((client.security, server))
    }

    #[test]
    fn both_directions_unseal_in_order() {
        let (mut client, mut server) = handshake("s3cret").unwrap();

        for body in ["<s:Envelope>create</s:Envelope>", "<s:Envelope>command</s:Envelope>"] {
            let mut wire = body.as_bytes().to_vec();
            let signature = client.seal(&mut wire).unwrap();
            assert_ne!(wire, body.as_bytes());
            server.unseal(&signature, &mut wire).unwrap();
            assert_eq!(wire, body.as_bytes());

            let mut reply = b"<s:Envelope>ok</s:Envelope>".to_vec();
            let signature = server.seal(&mut reply).unwrap();
            client.unseal(&signature, &mut reply).unwrap();
            assert_eq!(reply, b"<s:Envelope>ok</s:Envelope>");
        }
    }

    #[test]
    fn tampered_message_fails_verification() {
        let (mut client, mut server) = handshake("s3cret").unwrap();
        let mut wire = b"Restart-Computer -Force".to_vec();
        let signature = client.seal(&mut wire).unwrap();
        wire[0] ^= 0xff;
        assert!(matches!(
            server.unseal(&signature, &mut wire),
            Err(NtlmError::BadSignature)
        ));
    }

    #[test]
    fn wrong_password_is_rejected_by_acceptor() {
        assert!(matches!(handshake("guess"), Err(NtlmError::BadSignature)));
    }
}
