use std::{collections::HashSet, marker::PhantomData};

use headers::authorization::{Bearer, Credentials};
use http::{header, Request, Response, StatusCode};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use tower_http::validate_request::ValidateRequest;

use crate::claims::Claims;

pub mod access;
pub mod claims;

pub struct Keys {
    encoding: EncodingKey,
}

impl Keys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
        }
    }

    pub fn token(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(&Header::default(), claims, &self.encoding)
    }
}

/// Resolve a bearer credential to claims.
///
/// Static operator tokens win and carry full access; anything else is
/// treated as a JWT signed with the shared secret.
pub fn verify(token: &str, secret: &str, tokens: &[String]) -> Option<Claims> {
    if tokens.iter().any(|t| t == token) {
        return Some(Claims::open());
    }
    if secret.is_empty() {
        return None;
    }
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

/// Claims for a request outside the validated router, e.g. a WebSocket
/// handshake: `Authorization: Bearer` header first, then a `token`
/// query parameter. `None` means anonymous.
pub fn verify_request(
    headers: &http::HeaderMap,
    query_token: Option<&str>,
    secret: &str,
    tokens: &[String],
) -> Option<Claims> {
    if secret.is_empty() && tokens.is_empty() {
        return Some(Claims::open());
    }
    if let Some(bearer) = headers.get(header::AUTHORIZATION).and_then(Bearer::decode) {
        if let Some(claims) = verify(bearer.token(), secret, tokens) {
            return Some(claims);
        }
    }
    query_token.and_then(|t| verify(t, secret, tokens))
}

pub struct ManyValidate<ResBody> {
    secret: String,
    tokens: HashSet<String>,
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> ManyValidate<ResBody> {
    pub fn new(secret: String, tokens: Vec<String>) -> Self {
        Self {
            secret,
            tokens: tokens.into_iter().collect(),
            _ty: PhantomData,
        }
    }
}

impl<ResBody> Clone for ManyValidate<ResBody> {
    fn clone(&self) -> Self {
        Self {
            secret: self.secret.clone(),
            tokens: self.tokens.clone(),
            _ty: PhantomData,
        }
    }
}

impl<B, ResBody: Default> ValidateRequest<B> for ManyValidate<ResBody> {
    type ResponseBody = ResBody;

    fn validate(&mut self, request: &mut Request<B>) -> Result<(), Response<Self::ResponseBody>> {
        if self.tokens.is_empty() && self.secret.is_empty() {
            request.extensions_mut().insert(Claims::open());
            return Ok(());
        }

        let claims = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(Bearer::decode)
            .and_then(|bearer| {
                if self.tokens.contains(bearer.token()) {
                    Some(Claims::open())
                } else {
                    verify(bearer.token(), &self.secret, &[])
                }
            });

        match claims {
            Some(claims) => {
                request.extensions_mut().insert(claims);
                Ok(())
            }
            None => Err(Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(ResBody::default())
                .unwrap()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::response::Role;

    fn claims(sub: &str, role: Role) -> Claims {
        Claims {
            sub: sub.to_string(),
            role,
            exp: usize::MAX / 2,
        }
    }

    #[test]
    fn test_verify_roundtrip() {
        let keys = Keys::new(b"secret");
        let token = keys.token(&claims("dj.jane", Role::Dj)).unwrap();

        let verified = verify(&token, "secret", &[]).unwrap();
        assert_eq!(verified.sub, "dj.jane");
        assert_eq!(verified.role, Role::Dj);

        assert!(verify(&token, "other-secret", &[]).is_none());
        assert!(verify("not-a-token", "secret", &[]).is_none());
    }

    #[test]
    fn test_static_token_grants_open_claims() {
        let verified = verify("operator", "", &["operator".to_string()]).unwrap();
        assert_eq!(verified.sub, claims::ANY_ID);
        assert_eq!(verified.role, Role::Admin);
    }

    #[test]
    fn test_verify_request_prefers_header() {
        let keys = Keys::new(b"secret");
        let header_token = keys.token(&claims("a", Role::Dj)).unwrap();
        let query_token = keys.token(&claims("b", Role::Listener)).unwrap();

        let mut headers = http::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            format!("Bearer {}", header_token).parse().unwrap(),
        );

        let verified = verify_request(&headers, Some(&query_token), "secret", &[]).unwrap();
        assert_eq!(verified.sub, "a");

        let verified = verify_request(&http::HeaderMap::new(), Some(&query_token), "secret", &[])
            .unwrap();
        assert_eq!(verified.sub, "b");

        assert!(verify_request(&http::HeaderMap::new(), None, "secret", &[]).is_none());
    }
}
