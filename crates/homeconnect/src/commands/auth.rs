//! OAuth login, status and logout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use homeconnect_core::{AuthState, Platform};

use crate::cli::{AuthArgs, AuthCommand, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct AuthStatus {
    profile: String,
    client_id: String,
    state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires: Option<DateTime<Utc>>,
    scopes: Vec<String>,
}

fn status_detail(s: &AuthStatus) -> String {
    let mut lines = vec![
        format!("Profile:   {}", s.profile),
        format!("Client:    {}", s.client_id),
        format!("State:     {}", s.state),
    ];
    if let Some(expires) = s.expires {
        lines.push(format!("Expires:   {}", expires.to_rfc3339()));
    }
    lines.push(format!(
        "Scopes:    {}",
        if s.scopes.is_empty() {
            "-".into()
        } else {
            s.scopes.join(", ")
        }
    ));
    lines.join("\n")
}

fn state_label(state: &AuthState) -> &'static str {
    match state {
        AuthState::Unauthorised => "unauthorised",
        AuthState::PendingUserAction(_) => "pending",
        AuthState::Authorised { .. } => "authorised",
        AuthState::Refreshing => "refreshing",
    }
}

pub async fn handle(args: AuthArgs, resolved: Resolved, global: &GlobalOpts) -> Result<(), CliError> {
    let profile = resolved.profile_name;
    let platform = Platform::new(resolved.client, resolved.store)?;
    let auth = platform.auth();

    match args.command {
        AuthCommand::Login { timeout } => login(&platform, timeout, global).await,

        AuthCommand::Status => {
            let state = auth.state();
            let status = AuthStatus {
                profile,
                client_id: platform.config().client_id.clone(),
                state: state_label(&state),
                expires: match state {
                    AuthState::Authorised { expires } => Some(expires),
                    _ => None,
                },
                scopes: auth.scopes(),
            };
            let out = output::render_single(&global.output, &status, status_detail, |s| {
                s.state.to_owned()
            });
            output::print_output(&out, global.quiet);
            Ok(())
        }

        AuthCommand::Logout => {
            if auth.has_credentials() {
                auth.invalidate_credentials();
                output::print_done(&format!("Tokens for '{profile}' discarded"), global.quiet);
            } else {
                output::print_done(&format!("No tokens stored for '{profile}'"), global.quiet);
            }
            Ok(())
        }
    }
}

/// Run the token authority until it holds a valid access token,
/// showing the device-flow code while the user approves access.
async fn login(platform: &Platform, timeout: Duration, global: &GlobalOpts) -> Result<(), CliError> {
    let auth = platform.auth().clone();
    if auth.has_credentials() {
        auth.invalidate_credentials();
    }

    let cancel = CancellationToken::new();
    let runner = {
        let auth = auth.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { auth.run(cancel).await })
    };

    let spinner = if global.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new_spinner()
    };
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Requesting authorisation...");

    let mut states = auth.watch_state();
    let outcome = tokio::time::timeout(timeout, async {
        loop {
            let state = states.borrow_and_update().clone();
            match state {
                AuthState::PendingUserAction(action) => {
                    spinner.set_message(format!(
                        "Open {} and enter code {} (expires {})",
                        action.verification_uri,
                        action.user_code,
                        action.expires.with_timezone(&chrono::Local).format("%H:%M:%S"),
                    ));
                }
                AuthState::Authorised { expires } => return expires,
                AuthState::Unauthorised | AuthState::Refreshing => {}
            }
            if states.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    })
    .await;

    cancel.cancel();
    let _ = runner.await;

    match outcome {
        Ok(expires) => {
            spinner.finish_with_message(format!(
                "Authorised; access token valid until {}",
                expires.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
            ));
            Ok(())
        }
        Err(_) => {
            spinner.abandon_with_message("Authorisation not completed");
            Err(CliError::LoginTimeout {
                seconds: timeout.as_secs(),
            })
        }
    }
}
