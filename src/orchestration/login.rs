//! Login flow against the shared page.
//!
//! Verification is strict: after submit, success requires a success marker
//! (dashboard navigation landmark or success text). A lingering password
//! field does not fail verification when a marker is also present, but no
//! marker means failure. With credentials supplied, a verification failure is
//! fatal to the run; without credentials, headless runs proceed
//! unauthenticated and headful runs pause for a manual login.

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::{Config, Credentials, WorkaroundFlags};
use crate::explore::probe;

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("login verification failed: {0}")]
    VerificationFailed(String),

    #[error("login form interaction failed: {0}")]
    Interaction(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Verified authenticated session.
    Authenticated,
    /// No login form was present; the page is already usable.
    NoLoginForm,
    /// No credentials and no way to log in; crawling proceeds without a
    /// session.
    Unauthenticated,
}

const LOGIN_FORM_PROBE_JS: &str = r#"
(() => { /* uiscoutLoginProbe */
  const email = document.querySelector(
    'input[type="email"], input[name="email"], input[name="username"], input[autocomplete="username"]'
  );
  const password = document.querySelector('input[type="password"]');
  if (!email || !password) return null;
  const submit = document.querySelector(
    'button[type="submit"], input[type="submit"], form button'
  );
  const sel = (el, fallback) => {
    if (!el) return fallback;
    if (el.id) return '#' + CSS.escape(el.id);
    if (el.name) return el.tagName.toLowerCase() + '[name="' + el.name + '"]';
    return fallback;
  };
  return {
    email: sel(email, 'input[type="email"], input[name="email"], input[name="username"]'),
    password: sel(password, 'input[type="password"]'),
    submit: sel(submit, 'button[type="submit"]'),
  };
})()
"#;

const VERIFY_PROBE_JS: &str = r#"
(() => { /* uiscoutVerifyProbe */
  const password = document.querySelector('input[type="password"]');
  const marker =
    document.querySelector('nav, [role="navigation"], [class*="dashboard"]') !== null ||
    /welcome|logged in|sign out|log out/i.test(document.body ? document.body.innerText : '');
  return { password_field: password !== null, success_marker: marker };
})()
"#;

const CLEAR_LOGIN_FIELDS_JS: &str = r#"
(() => { /* uiscoutClearLoginFields */
  for (const el of document.querySelectorAll(
    'input[type="email"], input[type="password"], input[name="username"]'
  )) { el.value = ''; }
  return true;
})()
"#;

#[derive(Debug, Clone, serde::Deserialize)]
struct LoginForm {
    email: String,
    password: String,
    submit: String,
}

/// Poll for the login form with a bounded wait.
async fn wait_for_login_form(driver: &dyn PageDriver) -> Option<LoginForm> {
    let attempts = Config::LOGIN_FIELD_WAIT_SECS * 2;
    for _ in 0..attempts {
        if let Some(value) = probe(driver, LOGIN_FORM_PROBE_JS, "login-form").await {
            if let Ok(form) = serde_json::from_value::<LoginForm>(value) {
                return Some(form);
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    None
}

async fn verification_state(driver: &dyn PageDriver) -> (bool, bool) {
    match probe(driver, VERIFY_PROBE_JS, "login-verify").await {
        Some(value) => (
            value["password_field"].as_bool().unwrap_or(false),
            value["success_marker"].as_bool().unwrap_or(false),
        ),
        None => (false, false),
    }
}

/// Log in on the given page, if the page asks for it.
pub async fn perform_login(
    driver: &dyn PageDriver,
    credentials: Option<&Credentials>,
    workarounds: &WorkaroundFlags,
    headless: bool,
) -> Result<LoginOutcome, LoginError> {
    let form = match wait_for_login_form(driver).await {
        Some(form) => form,
        None => {
            let (_, marker) = verification_state(driver).await;
            return if marker {
                debug!("no login form; success marker already present");
                Ok(LoginOutcome::Authenticated)
            } else {
                debug!("no login form and no marker; proceeding without a session");
                Ok(LoginOutcome::NoLoginForm)
            };
        }
    };

    let credentials = match credentials {
        Some(credentials) => credentials,
        None if headless => {
            warn!("login form present but no credentials; proceeding unauthenticated");
            return Ok(LoginOutcome::Unauthenticated);
        }
        None => {
            // Headful: a human can log in by hand
            info!(
                "no credentials; waiting up to {}s for manual login",
                Config::MANUAL_LOGIN_WAIT_SECS
            );
            let attempts = Config::MANUAL_LOGIN_WAIT_SECS;
            for _ in 0..attempts {
                let (_, marker) = verification_state(driver).await;
                if marker {
                    return Ok(LoginOutcome::Authenticated);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            warn!("manual login window elapsed; proceeding unauthenticated");
            return Ok(LoginOutcome::Unauthenticated);
        }
    };

    driver
        .fill(&form.email, &credentials.email)
        .await
        .map_err(|e| LoginError::Interaction(e.to_string()))?;
    driver
        .fill(&form.password, &credentials.password)
        .await
        .map_err(|e| LoginError::Interaction(e.to_string()))?;
    driver
        .click(&form.submit)
        .await
        .map_err(|e| LoginError::Interaction(e.to_string()))?;

    if workarounds.clear_fields_after_submit {
        // Some forms re-populate the fields after submit
        let _ = probe(driver, CLEAR_LOGIN_FIELDS_JS, "clear-login-fields").await;
    }

    tokio::time::sleep(Duration::from_millis(Config::LOGIN_SETTLE_MS)).await;

    for _ in 0..Config::LOGIN_VERIFY_ATTEMPTS {
        let (password_field, marker) = verification_state(driver).await;
        if marker {
            if password_field {
                debug!("password field lingering but success marker present");
            }
            info!("login verified");
            return Ok(LoginOutcome::Authenticated);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Credentials were supplied and the app never showed a success marker:
    // fail closed
    Err(LoginError::VerificationFailed(
        "no success marker after submit".to_string(),
    ))
}
