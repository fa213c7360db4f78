use std::net::IpAddr;
use std::time::Duration;

use base64::Engine;
use ipnet::IpNet;
use subtle::ConstantTimeEq;

use covenant_core::constants::{AUTH_FAILURE_PENALTY_MS, SHORT_PASSWORD_THRESHOLD};

/// Credentials loaded once at startup. Missing either half is a hard start
/// abort at the node layer, not something this type itself enforces.
#[derive(Clone)]
pub struct RpcCredentials {
    pub user: String,
    pub password: String,
}

impl RpcCredentials {
    /// Constant-time comparison against a decoded `user:pass` pair, so a
    /// timing side-channel can't narrow down the password character by
    /// character.
    fn matches(&self, user: &str, password: &str) -> bool {
        let user_ok: bool = self.user.as_bytes().ct_eq(user.as_bytes()).into();
        let pass_ok: bool = self.password.as_bytes().ct_eq(password.as_bytes()).into();
        user_ok & pass_ok
    }
}

pub enum AuthOutcome {
    Ok,
    /// Caller should sleep `AUTH_FAILURE_PENALTY_MS` before responding 401
    /// if the configured password is short.
    Failed { penalize: bool },
}

/// Validate an `Authorization: Basic base64(user:pass)` header value.
pub fn check_basic_auth(creds: &RpcCredentials, header_value: Option<&str>) -> AuthOutcome {
    let penalize = creds.password.len() < SHORT_PASSWORD_THRESHOLD;

    let Some(header) = header_value else {
        return AuthOutcome::Failed { penalize };
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return AuthOutcome::Failed { penalize };
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return AuthOutcome::Failed { penalize };
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return AuthOutcome::Failed { penalize };
    };
    let Some((user, password)) = decoded.split_once(':') else {
        return AuthOutcome::Failed { penalize };
    };

    if creds.matches(user, password) {
        AuthOutcome::Ok
    } else {
        AuthOutcome::Failed { penalize }
    }
}

pub async fn apply_auth_penalty() {
    tokio::time::sleep(Duration::from_millis(AUTH_FAILURE_PENALTY_MS)).await;
}

/// Source-IP allowlist: loopback is always permitted; anything else must
/// fall inside a configured CIDR block.
pub struct Allowlist {
    nets: Vec<IpNet>,
}

impl Allowlist {
    pub fn new(nets: Vec<IpNet>) -> Self {
        Self { nets }
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        if addr.is_loopback() {
            return true;
        }
        self.nets.iter().any(|net| net.contains(&addr))
    }
}
