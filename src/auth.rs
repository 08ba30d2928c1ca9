// Authentication for Gauntlet
// Login/register requests and token extraction from login responses
//
// Targets return the session token in one of a few known places. Each is a named shape and
// extraction either matches one of them or fails with the keys it did see.

use crate::engine::{ProbeRequest, ProbeResponse, ResponseBody};
use crate::error::AuthError;
use crate::models::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A test account for one role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub role: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Extra fields sent on registration (company name, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Value>,
}

impl Account {
    pub fn new(role: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            email: email.into(),
            password: password.into(),
            profile: None,
        }
    }
}

/// Supported locations of the token in a login response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginShape {
    /// `{"data": {"token": ".."}}`
    DataToken,
    /// `{"payload": {"token": ".."}}`
    PayloadToken,
    /// `{"token": ".."}`
    TopLevelToken,
    /// `{"accessToken": ".."}` or `{"access_token": ".."}`
    AccessToken,
    /// `Set-Cookie: token=..` (also `access_token`, `jwt`)
    Cookie,
}

const COOKIE_NAMES: [&str; 3] = ["token", "access_token", "jwt"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedToken {
    pub token: String,
    pub shape: LoginShape,
}

pub fn login_request(base_path: &str, account: &Account) -> ProbeRequest {
    ProbeRequest::new(Method::POST, format!("{}/auth/login", base_path)).json(json!({
        "email": account.email,
        "password": account.password,
    }))
}

pub fn register_request(base_path: &str, account: &Account) -> ProbeRequest {
    let mut body = json!({
        "email": account.email,
        "password": account.password,
        "role": account.role,
    });
    if let (Some(Value::Object(extra)), Value::Object(map)) = (&account.profile, &mut body) {
        for (k, v) in extra {
            map.insert(k.clone(), v.clone());
        }
    }
    ProbeRequest::new(Method::POST, format!("{}/auth/register", base_path)).json(body)
}

pub fn logout_request(base_path: &str, token: &str) -> ProbeRequest {
    ProbeRequest::new(Method::POST, format!("{}/auth/logout", base_path)).bearer(Some(token.to_string()))
}

/// Pull the session token out of a login response. Never returns an empty token.
pub fn extract_token(response: &ProbeResponse) -> Result<ExtractedToken, AuthError> {
    if !(200..300).contains(&response.status) {
        return Err(AuthError::Rejected(response.status));
    }

    if let ResponseBody::Json(body) = &response.body {
        let json_shapes: [(LoginShape, &[&str]); 5] = [
            (LoginShape::DataToken, &["data", "token"]),
            (LoginShape::PayloadToken, &["payload", "token"]),
            (LoginShape::TopLevelToken, &["token"]),
            (LoginShape::AccessToken, &["accessToken"]),
            (LoginShape::AccessToken, &["access_token"]),
        ];
        for (shape, path) in json_shapes {
            if let Some(token) = string_at(body, path) {
                return Ok(ExtractedToken { token, shape });
            }
        }
    }

    for cookie in response.header_values("set-cookie") {
        if let Some(token) = cookie_value(cookie) {
            return Ok(ExtractedToken {
                token,
                shape: LoginShape::Cookie,
            });
        }
    }

    Err(AuthError::UnrecognisedShape {
        status: response.status,
        keys: describe_keys(&response.body),
    })
}

fn string_at(body: &Value, path: &[&str]) -> Option<String> {
    let mut cur = body;
    for key in path {
        cur = cur.get(*key)?;
    }
    cur.as_str().filter(|s| !s.is_empty()).map(|s| s.to_string())
}

fn cookie_value(set_cookie: &str) -> Option<String> {
    let pair = set_cookie.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    let value = value.trim();
    if COOKIE_NAMES.iter().any(|n| n.eq_ignore_ascii_case(name)) && !value.is_empty() {
        Some(value.to_string())
    } else {
        None
    }
}

fn describe_keys(body: &ResponseBody) -> String {
    match body {
        ResponseBody::Json(Value::Object(map)) => {
            let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            format!("[{}]", keys.join(", "))
        }
        ResponseBody::Json(other) => format!("<non-object json: {}>", type_name(other)),
        ResponseBody::Text(_) => "<text body>".to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_each_json_shape() {
        let cases = [
            (json!({"data": {"token": "a"}}), LoginShape::DataToken),
            (json!({"payload": {"token": "b"}}), LoginShape::PayloadToken),
            (json!({"token": "c"}), LoginShape::TopLevelToken),
            (json!({"accessToken": "d"}), LoginShape::AccessToken),
            (json!({"access_token": "e"}), LoginShape::AccessToken),
        ];
        for (body, shape) in cases {
            let extracted = extract_token(&ProbeResponse::new(200, body)).unwrap();
            assert_eq!(extracted.shape, shape);
        }
    }

    #[test]
    fn test_extract_cookie_fallback() {
        let mut resp = ProbeResponse::new(200, json!({"ok": true}));
        resp.headers.push(("set-cookie".into(), "theme=dark; Path=/".into()));
        resp.headers.push(("set-cookie".into(), "token=abc.def.ghi; HttpOnly".into()));
        let extracted = extract_token(&resp).unwrap();
        assert_eq!(extracted.token, "abc.def.ghi");
        assert_eq!(extracted.shape, LoginShape::Cookie);
    }

    #[test]
    fn test_extract_fails_loudly() {
        let err = extract_token(&ProbeResponse::new(200, json!({"user": {"id": 1}}))).unwrap_err();
        match err {
            AuthError::UnrecognisedShape { keys, .. } => assert_eq!(keys, "[user]"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_token_is_not_a_match() {
        assert!(extract_token(&ProbeResponse::new(200, json!({"token": ""}))).is_err());
    }

    #[test]
    fn test_rejected_login() {
        assert!(matches!(
            extract_token(&ProbeResponse::new(401, json!({"token": "x"}))),
            Err(AuthError::Rejected(401))
        ));
    }

    #[test]
    fn test_register_merges_profile() {
        let mut account = Account::new("company", "c@x.io", "pw");
        account.profile = Some(json!({"companyName": "Acme"}));
        let req = register_request("/api", &account);
        assert_eq!(req.path, "/api/auth/register");
        match req.body {
            crate::engine::RequestBody::Json(body) => {
                assert_eq!(body["companyName"], json!("Acme"));
                assert_eq!(body["role"], json!("company"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
