//! NTLM authentication (MS-NLMP), connection-oriented.
//!
//! Three messages travel over a single connection:
//!   Type 1 – Negotiate    (client → server)
//!   Type 2 – Challenge    (server → client)
//!   Type 3 – Authenticate (client → server)
//!
//! Responses are NTLMv2. The NT hash needs MD4, which BoringSSL does not
//! expose, so a small implementation lives here; HMAC-MD5 is built on
//! `boring::hash`.

use crate::base::neterror::{NetError, RequestError};
use crate::http::auth::Credentials;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use boring::error::ErrorStack;
use boring::hash::MessageDigest;
use boring::pkey::PKey;
use boring::sign::Signer;
use std::time::{SystemTime, UNIX_EPOCH};

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const NEGOTIATE_OEM: u32 = 0x0000_0002;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_DOMAIN_SUPPLIED: u32 = 0x0000_1000;
pub const NEGOTIATE_WORKSTATION_SUPPLIED: u32 = 0x0000_2000;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_HEADER_LEN: usize = 32;
const CHALLENGE_HEADER_LEN: usize = 48;
const AUTHENTICATE_HEADER_LEN: usize = 64;

const AV_EOL: u16 = 0;
const AV_NB_DOMAIN_NAME: u16 = 2;
const AV_TIMESTAMP: u16 = 7;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

fn malformed(message: impl Into<String>) -> RequestError {
    RequestError::new(NetError::InvalidAuthChallenge, message)
}

/// Message type of an NTLM message, read at byte offset 8.
pub fn message_type(data: &[u8]) -> Result<u32, RequestError> {
    if data.len() < 12 {
        return Err(malformed(format!("NTLM message too short: {} bytes", data.len())));
    }
    if &data[0..8] != SIGNATURE {
        return Err(malformed("invalid NTLM signature"));
    }
    Ok(read_u32(data, 8))
}

/// Type 1. Domain and workstation travel as OEM bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiateMessage {
    pub flags: u32,
    pub domain: String,
    pub workstation: String,
}

impl NegotiateMessage {
    pub fn new(domain: &str, workstation: &str) -> Self {
        let mut flags = NEGOTIATE_UNICODE
            | NEGOTIATE_OEM
            | REQUEST_TARGET
            | NEGOTIATE_NTLM
            | NEGOTIATE_ALWAYS_SIGN
            | NEGOTIATE_EXTENDED_SESSIONSECURITY;
        if !domain.is_empty() {
            flags |= NEGOTIATE_DOMAIN_SUPPLIED;
        }
        if !workstation.is_empty() {
            flags |= NEGOTIATE_WORKSTATION_SUPPLIED;
        }
        Self {
            flags,
            domain: domain.to_string(),
            workstation: workstation.to_string(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let domain = self.domain.as_bytes();
        let workstation = self.workstation.as_bytes();
        let domain_offset = NEGOTIATE_HEADER_LEN as u32;
        let workstation_offset = domain_offset + domain.len() as u32;

        let mut msg = Vec::with_capacity(NEGOTIATE_HEADER_LEN + domain.len() + workstation.len());
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&1u32.to_le_bytes());
        msg.extend_from_slice(&self.flags.to_le_bytes());
        write_security_buffer(&mut msg, domain.len(), domain_offset);
        write_security_buffer(&mut msg, workstation.len(), workstation_offset);
        msg.extend_from_slice(domain);
        msg.extend_from_slice(workstation);
        msg
    }

    pub fn parse(data: &[u8]) -> Result<Self, RequestError> {
        expect_type(data, 1, NEGOTIATE_HEADER_LEN)?;
        Ok(Self {
            flags: read_u32(data, 12),
            domain: String::from_utf8_lossy(read_buffer(data, 16)?).into_owned(),
            workstation: String::from_utf8_lossy(read_buffer(data, 24)?).into_owned(),
        })
    }
}

/// Type 2, as sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeMessage {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_name: String,
    /// Raw AV pairs, echoed back inside the NTLMv2 blob.
    pub target_info: Vec<u8>,
}

impl ChallengeMessage {
    /// A challenge naming `target` as its NetBIOS domain.
    pub fn new(server_challenge: [u8; 8], target: &str) -> Self {
        let mut target_info = Vec::new();
        let name = to_utf16le(target);
        target_info.extend_from_slice(&AV_NB_DOMAIN_NAME.to_le_bytes());
        target_info.extend_from_slice(&(name.len() as u16).to_le_bytes());
        target_info.extend_from_slice(&name);
        target_info.extend_from_slice(&AV_EOL.to_le_bytes());
        target_info.extend_from_slice(&0u16.to_le_bytes());
        Self {
            flags: NEGOTIATE_UNICODE
                | REQUEST_TARGET
                | NEGOTIATE_NTLM
                | NEGOTIATE_ALWAYS_SIGN
                | NEGOTIATE_EXTENDED_SESSIONSECURITY
                | NEGOTIATE_TARGET_INFO,
            server_challenge,
            target_name: target.to_string(),
            target_info,
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, RequestError> {
        expect_type(data, 2, 32)?;
        let flags = read_u32(data, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&data[24..32]);

        let target_name = decode_string(read_buffer(data, 12)?, flags);
        let target_info = if data.len() >= CHALLENGE_HEADER_LEN {
            read_buffer(data, 40)?.to_vec()
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_name,
            target_info,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let name = encode_string(&self.target_name, self.flags);
        let name_offset = CHALLENGE_HEADER_LEN as u32;
        let info_offset = name_offset + name.len() as u32;

        let mut msg = Vec::with_capacity(CHALLENGE_HEADER_LEN + name.len() + self.target_info.len());
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&2u32.to_le_bytes());
        write_security_buffer(&mut msg, name.len(), name_offset);
        msg.extend_from_slice(&self.flags.to_le_bytes());
        msg.extend_from_slice(&self.server_challenge);
        msg.extend_from_slice(&[0u8; 8]);
        write_security_buffer(&mut msg, self.target_info.len(), info_offset);
        msg.extend_from_slice(&name);
        msg.extend_from_slice(&self.target_info);
        msg
    }

    /// `MsvAvTimestamp` from the target info, if the server sent one.
    pub fn timestamp(&self) -> Option<[u8; 8]> {
        let info = &self.target_info;
        let mut at = 0;
        while at + 4 <= info.len() {
            let id = u16::from_le_bytes([info[at], info[at + 1]]);
            let len = u16::from_le_bytes([info[at + 2], info[at + 3]]) as usize;
            let value = info.get(at + 4..at + 4 + len)?;
            match id {
                AV_EOL => return None,
                AV_TIMESTAMP if len == 8 => {
                    let mut ts = [0u8; 8];
                    ts.copy_from_slice(value);
                    return Some(ts);
                }
                _ => at += 4 + len,
            }
        }
        None
    }
}

/// Type 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticateMessage {
    pub flags: u32,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub user: String,
    pub workstation: String,
}

impl AuthenticateMessage {
    /// Answer `challenge` with NTLMv2 responses.
    pub fn respond(
        challenge: &ChallengeMessage,
        credentials: &Credentials,
    ) -> Result<Self, RequestError> {
        let mut client_challenge = [0u8; 8];
        boring::rand::rand_bytes(&mut client_challenge).map_err(|e| {
            RequestError::new(NetError::InvalidAuthCredentials, format!("client challenge: {}", e))
                .with_source(e)
        })?;
        let (domain, user) = credentials.ntlm_identity();
        let workstation = credentials.workstation().unwrap_or_default();
        Self::respond_with(
            challenge,
            domain,
            user,
            credentials.password(),
            workstation,
            client_challenge,
            challenge.timestamp().unwrap_or_else(filetime_now),
        )
    }

    /// Deterministic core of [`respond`](Self::respond).
    pub fn respond_with(
        challenge: &ChallengeMessage,
        domain: &str,
        user: &str,
        password: &str,
        workstation: &str,
        client_challenge: [u8; 8],
        timestamp: [u8; 8],
    ) -> Result<Self, RequestError> {
        let key = ntowf_v2(password, user, domain)?;

        let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
        blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
        blob.extend_from_slice(&timestamp);
        blob.extend_from_slice(&client_challenge);
        blob.extend_from_slice(&[0u8; 4]);
        blob.extend_from_slice(&challenge.target_info);
        blob.extend_from_slice(&[0u8; 4]);

        let mut nt_response = nt_proof(&key, &challenge.server_challenge, &blob)?.to_vec();
        nt_response.extend_from_slice(&blob);

        // With a server timestamp the LM response is all zeros.
        let lm_response = if challenge.timestamp().is_some() {
            vec![0u8; 24]
        } else {
            lmv2_response(&key, &challenge.server_challenge, &client_challenge)?
        };

        let charset = if challenge.flags & NEGOTIATE_UNICODE != 0 {
            NEGOTIATE_UNICODE
        } else {
            NEGOTIATE_OEM
        };
        let flags = charset
            | NEGOTIATE_NTLM
            | NEGOTIATE_ALWAYS_SIGN
            | (challenge.flags & (NEGOTIATE_EXTENDED_SESSIONSECURITY | NEGOTIATE_TARGET_INFO));

        Ok(Self {
            flags,
            lm_response,
            nt_response,
            domain: domain.to_string(),
            user: user.to_string(),
            workstation: workstation.to_string(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let domain = encode_string(&self.domain, self.flags);
        let user = encode_string(&self.user, self.flags);
        let workstation = encode_string(&self.workstation, self.flags);

        let lm_offset = AUTHENTICATE_HEADER_LEN as u32;
        let nt_offset = lm_offset + self.lm_response.len() as u32;
        let domain_offset = nt_offset + self.nt_response.len() as u32;
        let user_offset = domain_offset + domain.len() as u32;
        let workstation_offset = user_offset + user.len() as u32;
        let end = workstation_offset + workstation.len() as u32;

        let mut msg = Vec::with_capacity(end as usize);
        msg.extend_from_slice(SIGNATURE);
        msg.extend_from_slice(&3u32.to_le_bytes());
        write_security_buffer(&mut msg, self.lm_response.len(), lm_offset);
        write_security_buffer(&mut msg, self.nt_response.len(), nt_offset);
        write_security_buffer(&mut msg, domain.len(), domain_offset);
        write_security_buffer(&mut msg, user.len(), user_offset);
        write_security_buffer(&mut msg, workstation.len(), workstation_offset);
        // No session key.
        write_security_buffer(&mut msg, 0, end);
        msg.extend_from_slice(&self.flags.to_le_bytes());

        msg.extend_from_slice(&self.lm_response);
        msg.extend_from_slice(&self.nt_response);
        msg.extend_from_slice(&domain);
        msg.extend_from_slice(&user);
        msg.extend_from_slice(&workstation);
        msg
    }

    pub fn parse(data: &[u8]) -> Result<Self, RequestError> {
        expect_type(data, 3, AUTHENTICATE_HEADER_LEN)?;
        let flags = read_u32(data, 60);
        Ok(Self {
            flags,
            lm_response: read_buffer(data, 12)?.to_vec(),
            nt_response: read_buffer(data, 20)?.to_vec(),
            domain: decode_string(read_buffer(data, 28)?, flags),
            user: decode_string(read_buffer(data, 36)?, flags),
            workstation: decode_string(read_buffer(data, 44)?, flags),
        })
    }

    /// Check the NTLMv2 proof against `password`. Server side of the
    /// handshake; the client never calls this.
    pub fn verify_v2(&self, password: &str, server_challenge: &[u8; 8]) -> Result<bool, RequestError> {
        if self.nt_response.len() <= 16 {
            return Ok(false);
        }
        let key = ntowf_v2(password, &self.user, &self.domain)?;
        let (proof, blob) = self.nt_response.split_at(16);
        Ok(nt_proof(&key, server_challenge, blob)?[..] == *proof)
    }
}

/// `NTLM <base64 type 1>`.
pub fn negotiate_token(credentials: &Credentials) -> String {
    let (domain, _) = credentials.ntlm_identity();
    let workstation = credentials.workstation().unwrap_or_default();
    format!(
        "NTLM {}",
        STANDARD.encode(NegotiateMessage::new(domain, workstation).to_bytes())
    )
}

/// `NTLM <base64 type 3>` answering the decoded type 2 in `challenge`.
pub fn authenticate_token(challenge: &[u8], credentials: &Credentials) -> Result<String, RequestError> {
    let kind = message_type(challenge)?;
    if kind != 2 {
        return Err(malformed(format!("expected NTLM type 2, got type {}", kind)));
    }
    let challenge = ChallengeMessage::parse(challenge)?;
    let message = AuthenticateMessage::respond(&challenge, credentials)?;
    Ok(format!("NTLM {}", STANDARD.encode(message.to_bytes())))
}

/// NTOWFv1: MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    md4(&to_utf16le(password))
}

/// NTOWFv2: HMAC-MD5 keyed by the NT hash over UTF-16LE(upper(user) + domain).
pub fn ntowf_v2(password: &str, user: &str, domain: &str) -> Result<[u8; 16], RequestError> {
    let identity = format!("{}{}", user.to_uppercase(), domain);
    hmac_md5(&nt_hash(password), &to_utf16le(&identity))
}

fn nt_proof(key: &[u8; 16], server_challenge: &[u8; 8], blob: &[u8]) -> Result<[u8; 16], RequestError> {
    let mut input = Vec::with_capacity(8 + blob.len());
    input.extend_from_slice(server_challenge);
    input.extend_from_slice(blob);
    hmac_md5(key, &input)
}

fn lmv2_response(
    key: &[u8; 16],
    server_challenge: &[u8; 8],
    client_challenge: &[u8; 8],
) -> Result<Vec<u8>, RequestError> {
    let mut input = [0u8; 16];
    input[..8].copy_from_slice(server_challenge);
    input[8..].copy_from_slice(client_challenge);
    let mut response = hmac_md5(key, &input)?.to_vec();
    response.extend_from_slice(client_challenge);
    Ok(response)
}

/// Current time as a little-endian Windows FILETIME.
fn filetime_now() -> [u8; 8] {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let ticks = (since_epoch.as_secs() + FILETIME_EPOCH_OFFSET) * 10_000_000
        + u64::from(since_epoch.subsec_nanos() / 100);
    ticks.to_le_bytes()
}

/// HMAC-MD5 (RFC 2104).
pub fn hmac_md5(key: &[u8], data: &[u8]) -> Result<[u8; 16], RequestError> {
    let failed = |e: ErrorStack| {
        RequestError::new(NetError::InvalidAuthCredentials, format!("hmac-md5: {}", e)).with_source(e)
    };
    let key = PKey::hmac(key).map_err(failed)?;
    let mut signer = Signer::new(MessageDigest::md5(), &key).map_err(failed)?;
    signer.update(data).map_err(failed)?;
    let mac = signer.sign_to_vec().map_err(failed)?;
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac);
    Ok(out)
}

/// MD4 (RFC 1320).
pub fn md4(input: &[u8]) -> [u8; 16] {
    const ROUND2_ORDER: [usize; 16] = [0, 4, 8, 12, 1, 5, 9, 13, 2, 6, 10, 14, 3, 7, 11, 15];
    const ROUND3_ORDER: [usize; 16] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];
    const SHIFTS: [[u32; 4]; 3] = [[3, 7, 11, 19], [3, 5, 9, 13], [3, 9, 11, 15]];

    let mut state: [u32; 4] = [0x6745_2301, 0xefcd_ab89, 0x98ba_dcfe, 0x1032_5476];

    let bit_len = (input.len() as u64).wrapping_mul(8);
    let mut msg = input.to_vec();
    msg.push(0x80);
    while msg.len() % 64 != 56 {
        msg.push(0);
    }
    msg.extend_from_slice(&bit_len.to_le_bytes());

    for block in msg.chunks_exact(64) {
        let mut x = [0u32; 16];
        for (word, bytes) in x.iter_mut().zip(block.chunks_exact(4)) {
            *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }

        let [mut a, mut b, mut c, mut d] = state;
        for step in 0..48 {
            let round = step / 16;
            let i = step % 16;
            let (mix, k) = match round {
                0 => ((b & c) | (!b & d), i),
                1 => (
                    ((b & c) | (b & d) | (c & d)).wrapping_add(0x5a82_7999),
                    ROUND2_ORDER[i],
                ),
                _ => ((b ^ c ^ d).wrapping_add(0x6ed9_eba1), ROUND3_ORDER[i]),
            };
            let t = a
                .wrapping_add(mix)
                .wrapping_add(x[k])
                .rotate_left(SHIFTS[round][i % 4]);
            a = d;
            d = c;
            c = b;
            b = t;
        }

        state[0] = state[0].wrapping_add(a);
        state[1] = state[1].wrapping_add(b);
        state[2] = state[2].wrapping_add(c);
        state[3] = state[3].wrapping_add(d);
    }

    let mut out = [0u8; 16];
    for (chunk, word) in out.chunks_exact_mut(4).zip(state) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    out
}

fn expect_type(data: &[u8], expected: u32, min_len: usize) -> Result<(), RequestError> {
    let kind = message_type(data)?;
    if kind != expected {
        return Err(malformed(format!("expected NTLM type {}, got type {}", expected, kind)));
    }
    if data.len() < min_len {
        return Err(malformed(format!(
            "NTLM type {} message truncated: {} bytes",
            expected,
            data.len()
        )));
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Resolve the security buffer (length, max length, offset) at `at`.
fn read_buffer(data: &[u8], at: usize) -> Result<&[u8], RequestError> {
    let field = data
        .get(at..at + 8)
        .ok_or_else(|| malformed("truncated NTLM security buffer"))?;
    let len = u16::from_le_bytes([field[0], field[1]]) as usize;
    if len == 0 {
        return Ok(&[]);
    }
    let offset = read_u32(field, 4) as usize;
    offset
        .checked_add(len)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| malformed("NTLM security buffer out of range"))
}

fn write_security_buffer(buf: &mut Vec<u8>, length: usize, offset: u32) {
    let length = length as u16;
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&offset.to_le_bytes());
}

fn encode_string(s: &str, flags: u32) -> Vec<u8> {
    if flags & NEGOTIATE_UNICODE != 0 {
        to_utf16le(s)
    } else {
        s.as_bytes().to_vec()
    }
}

fn decode_string(raw: &[u8], flags: u32) -> String {
    if flags & NEGOTIATE_UNICODE != 0 {
        let units: Vec<u16> = raw
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        String::from_utf8_lossy(raw).into_owned()
    }
}

fn to_utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}
