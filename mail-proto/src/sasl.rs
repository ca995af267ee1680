//! SASL PLAIN decode: a null-separated triple parser for the RFC 4616
//! `[authzid]\0authcid\0passwd` wire form.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use nom::bytes::complete::{take, take_while};
use nom::combinator::rest;
use nom::sequence::tuple;
use nom::IResult;

use crate::error::SessionError;

fn not_null(c: u8) -> bool {
    c != 0
}

fn triple(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8], &[u8])> {
    let (input, (authzid, _, authcid, _, passwd)) = tuple((
        take_while(not_null),
        take(1usize),
        take_while(not_null),
        take(1usize),
        rest,
    ))(input)?;
    Ok((input, (authzid, authcid, passwd)))
}

pub struct PlainCredentials {
    pub authzid: Option<String>,
    pub authcid: String,
    pub password: String,
}

/// Decodes a Base64 `AUTHENTICATE PLAIN` payload. Both authcid and
/// password must be non-empty.
pub fn decode_plain(b64: &str) -> Result<PlainCredentials, SessionError> {
    let raw = STANDARD
        .decode(b64.trim())
        .map_err(|_| SessionError::Parse("invalid base64 in AUTHENTICATE PLAIN".into()))?;

    let (_, (authzid, authcid, passwd)) = triple(&raw)
        .map_err(|_| SessionError::Parse("malformed SASL PLAIN payload".into()))?;

    let authcid = std::str::from_utf8(authcid)
        .map_err(|_| SessionError::Parse("SASL PLAIN authcid is not valid UTF-8".into()))?;
    let passwd = std::str::from_utf8(passwd)
        .map_err(|_| SessionError::Parse("SASL PLAIN password is not valid UTF-8".into()))?;

    if authcid.is_empty() || passwd.is_empty() {
        return Err(SessionError::Parse("SASL PLAIN authcid/password must be non-empty".into()));
    }

    let authzid = std::str::from_utf8(authzid).unwrap_or("");

    Ok(PlainCredentials {
        authzid: if authzid.is_empty() { None } else { Some(authzid.to_string()) },
        authcid: authcid.to_string(),
        password: passwd.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scenario_c() {
        let creds = decode_plain("AGFsaWNlQGV4YW1wbGUuY29tAHB3").unwrap();
        assert_eq!(creds.authcid, "alice@example.com");
        assert_eq!(creds.password, "pw");
        assert!(creds.authzid.is_none());
    }

    #[test]
    fn rejects_empty_password() {
        let b64 = STANDARD.encode(b"\0alice@example.com\0");
        assert!(decode_plain(&b64).is_err());
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode_plain("not base64!!").is_err());
    }
}
