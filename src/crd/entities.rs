//! Identity entities managed inside the platform's admin API
//!
//! The same types are embedded in the ApiPlatform/ApiTenant specs and sent
//! over the wire, so field names follow the remote API (snake_case).

use std::iter::Peekable;
use std::str::Chars;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// State the remote system reports for users that still need activation
pub const USER_STATE_PENDING: &str = "pending";

const DEFAULT_SEED_ROLE: &str = "admin";
const DEFAULT_SEED_EMAIL_FORMAT: &str = "evals%02d@example.com";
const DEFAULT_SEED_PASSWORD: &str = "Password1";

/// Widest padding a seed format directive may request
pub const MAX_FORMAT_WIDTH: usize = 32;

/// Most users a seed policy may synthesize
pub const MAX_SEED_COUNT: u32 = 1000;

/// A user account in the admin portal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct User {
    /// Remote id, 0 until the remote system assigned one
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,

    /// Login name, the identity key
    pub username: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,

    /// Write-only: the remote system never returns it
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Portal role (e.g. `admin`, `member`); empty means unspecified
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,

    /// Free-form status reported by the remote system
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

impl User {
    pub fn is_pending(&self) -> bool {
        self.state == USER_STATE_PENDING
    }
}

/// An authentication provider (SSO integration) configured on the account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuthProvider {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub id: i64,

    /// Provider kind (e.g. `github`, `keycloak`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Provider name, the identity key
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_secret: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub site: String,

    #[serde(default, skip_serializing_if = "is_false")]
    pub skip_ssl_certificate_verification: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub published: bool,
}

/// Rule for synthesizing `count` additional users indexed 1..=count
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SeedPolicy {
    #[serde(default)]
    pub count: u32,

    /// printf-style email format, e.g. `evals%02d@example.com`
    #[serde(default)]
    pub email_format: String,

    /// printf-style username format
    #[serde(default)]
    pub name_format: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub role: String,
}

impl SeedPolicy {
    /// Fill unset fields. The name format falls back to the email format.
    pub fn apply_defaults(&mut self) {
        if self.role.is_empty() {
            self.role = DEFAULT_SEED_ROLE.to_string();
        }
        if self.email_format.is_empty() {
            self.email_format = DEFAULT_SEED_EMAIL_FORMAT.to_string();
        }
        if self.name_format.is_empty() {
            self.name_format = self.email_format.clone();
        }
        if self.password.is_empty() {
            self.password = DEFAULT_SEED_PASSWORD.to_string();
        }
    }

    pub fn username_for(&self, index: u32) -> String {
        format_indexed(&self.name_format, index)
    }

    pub fn email_for(&self, index: u32) -> String {
        format_indexed(&self.email_format, index)
    }

    /// Synthesized user for `index`, before any merge with explicit users.
    pub fn user_for(&self, index: u32) -> User {
        User {
            username: self.username_for(index),
            email: self.email_for(index),
            password: self.password.clone(),
            role: self.role.clone(),
            ..Default::default()
        }
    }

    /// Whether the name format varies with the index.
    pub fn names_are_indexed(&self) -> bool {
        self.username_for(1) != self.username_for(2)
    }
}

/// Expand a printf-style format with a single integer argument.
///
/// Supports `%d`, `%v`, `%s` with optional `0` flag and width, and `%%`.
/// Unknown directives are copied through verbatim. Widths are clamped to
/// [`MAX_FORMAT_WIDTH`].
pub fn format_indexed(format: &str, index: u32) -> String {
    let mut out = String::with_capacity(format.len() + 4);
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut directive = String::from("%");
        let zero_pad = chars.peek() == Some(&'0');
        if zero_pad {
            directive.push('0');
            chars.next();
        }
        let width = take_width(&mut chars, &mut directive)
            .map_or(MAX_FORMAT_WIDTH, |w| w.min(MAX_FORMAT_WIDTH));

        match chars.next() {
            Some('d') | Some('v') | Some('s') => {
                if zero_pad {
                    out.push_str(&format!("{:0width$}", index, width = width));
                } else {
                    out.push_str(&format!("{:width$}", index, width = width));
                }
            }
            Some('%') if directive == "%" => out.push('%'),
            Some(other) => {
                out.push_str(&directive);
                out.push(other);
            }
            None => out.push_str(&directive),
        }
    }

    out
}

/// Widest width any directive in `format` asks for, `None` when a width
/// overflows `usize`.
pub fn widest_directive(format: &str) -> Option<usize> {
    let mut widest = 0;
    let mut chars = format.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        if chars.peek() == Some(&'0') {
            chars.next();
        }
        let mut directive = String::new();
        widest = widest.max(take_width(&mut chars, &mut directive)?);
        chars.next();
    }

    Some(widest)
}

/// Consume the width digits of a directive into `directive`.
fn take_width(chars: &mut Peekable<Chars<'_>>, directive: &mut String) -> Option<usize> {
    let mut width = Some(0usize);
    while let Some(&c) = chars.peek() {
        let Some(digit) = c.to_digit(10) else { break };
        chars.next();
        directive.push(c);
        width = width
            .and_then(|w| w.checked_mul(10))
            .and_then(|w| w.checked_add(digit as usize));
    }
    width
}

/// Account created for a tenant by the sign-up endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TenantAccount {
    /// 0 until the tenant has been signed up
    #[serde(default)]
    pub id: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub org_name: String,

    /// Host of the tenant's admin portal
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub admin_domain: String,

    /// Host of the tenant's developer portal
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub state: String,
}

/// `{"users":[{"user":{...}}]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserList {
    #[serde(default)]
    pub users: Vec<UserEnvelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: User,
}

/// `{"authentication_providers":[{"authentication_provider":{...}}]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthProviderList {
    #[serde(default)]
    pub authentication_providers: Vec<AuthProviderEnvelope>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthProviderEnvelope {
    pub authentication_provider: AuthProvider,
}

/// Body of the tenant sign-up call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignupRequest {
    pub org_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// `{"signup":{"account":{...},"access_token":{"value":"..."}}}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignupResponse {
    pub signup: Signup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signup {
    pub account: TenantAccount,
    pub access_token: AccessToken,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
}

fn is_zero(v: &i64) -> bool {
    *v == 0
}

fn is_false(v: &bool) -> bool {
    !*v
}
