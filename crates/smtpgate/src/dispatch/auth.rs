//! AUTH sub-machine for the PLAIN and LOGIN mechanisms.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;

use super::{Dispatcher, hook_failure};
use crate::config::{AuthMode, TlsMode};
use crate::error::ProtocolError;
use crate::handler::Handler;
use crate::session::{Session, Sequence};
use crate::types::{AuthMechanism, Reply, ReplyCode};

/// Base64 of `Username:`.
const USERNAME_PROMPT: &str = "VXNlcm5hbWU6";
/// Base64 of `Password:`.
const PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6";

impl<H: Handler> Dispatcher<H> {
    pub(super) async fn auth_start(
        &self,
        session: &mut Session,
        mechanism: AuthMechanism,
        initial_response: Option<String>,
    ) -> Result<Option<Reply>, ProtocolError> {
        if self.config.auth_mode == AuthMode::Forbidden {
            return Err(ProtocolError::SyntaxError);
        }
        if session.sequence != Sequence::Rset {
            return Err(ProtocolError::BadSequence);
        }
        if self.config.tls.mode == TlsMode::Required && !session.ctx.server.is_encrypted() {
            return Err(ProtocolError::TlsRequired);
        }
        if session.ctx.server.is_authenticated() {
            return Err(ProtocolError::BadSequence);
        }

        match (mechanism, initial_response) {
            (AuthMechanism::CramMd5, _) => Err(ProtocolError::MechanismNotSupported),
            (AuthMechanism::Plain, None) => {
                session.sequence = Sequence::AuthPlainValues;
                Ok(Some(Reply::single(ReplyCode::AUTH_CONTINUE, "")))
            }
            (AuthMechanism::Plain, Some(response)) => self.auth_plain(session, &response).await,
            (AuthMechanism::Login, None) => {
                session.sequence = Sequence::AuthLoginUser;
                Ok(Some(Reply::single(ReplyCode::AUTH_CONTINUE, USERNAME_PROMPT)))
            }
            (AuthMechanism::Login, Some(response)) => Self::auth_login_user(session, &response),
        }
    }

    /// Takes a client response while a challenge is open.
    pub(super) async fn auth_continue(
        &self,
        session: &mut Session,
        line: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        if line.trim() == "*" {
            session.login_user = None;
            session.sequence = Sequence::Rset;
            return Err(ProtocolError::AuthCanceled);
        }
        match session.sequence {
            Sequence::AuthPlainValues => self.auth_plain(session, line).await,
            Sequence::AuthLoginUser => Self::auth_login_user(session, line),
            Sequence::AuthLoginPass => self.auth_login_pass(session, line).await,
            _ => Err(ProtocolError::BadSequence),
        }
    }

    async fn auth_plain(
        &self,
        session: &mut Session,
        encoded: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        session.sequence = Sequence::Rset;
        let decoded = decode(encoded)?;
        let fields: Vec<&[u8]> = decoded.split(|&b| b == 0).collect();
        let [authorization_id, authentication_id, secret] = fields.as_slice() else {
            return Err(ProtocolError::SyntaxError);
        };
        let authorization_id = text(authorization_id)?;
        let authentication_id = text(authentication_id)?;
        let secret = text(secret)?;
        self.authenticate(session, &authorization_id, &authentication_id, &secret)
            .await
    }

    fn auth_login_user(
        session: &mut Session,
        encoded: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        session.sequence = Sequence::Rset;
        let user = text(&decode(encoded)?)?;
        session.login_user = Some(user);
        session.sequence = Sequence::AuthLoginPass;
        Ok(Some(Reply::single(ReplyCode::AUTH_CONTINUE, PASSWORD_PROMPT)))
    }

    async fn auth_login_pass(
        &self,
        session: &mut Session,
        encoded: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        session.sequence = Sequence::Rset;
        let user = session.login_user.take().unwrap_or_default();
        let secret = text(&decode(encoded)?)?;
        self.authenticate(session, "", &user, &secret).await
    }

    async fn authenticate(
        &self,
        session: &mut Session,
        authorization_id: &str,
        authentication_id: &str,
        secret: &str,
    ) -> Result<Option<Reply>, ProtocolError> {
        let replacement = self
            .handler
            .on_auth(&mut session.ctx, authorization_id, authentication_id, secret)
            .await
            .map_err(|err| hook_failure(err, ProtocolError::TemporaryAuthFailure, "on_auth"))?;

        let authorization_id = replacement.unwrap_or_else(|| authorization_id.to_string());
        let server = &mut session.ctx.server;
        server.authorization_id = if authorization_id.is_empty() {
            authentication_id.to_string()
        } else {
            authorization_id
        };
        server.authentication_id = authentication_id.to_string();
        server.authenticated = Some(Utc::now());
        tracing::info!(user = %server.authentication_id, "client authenticated");
        Ok(Some(Reply::single(ReplyCode::AUTH_SUCCEEDED, "OK")))
    }
}

fn decode(encoded: &str) -> Result<Vec<u8>, ProtocolError> {
    STANDARD
        .decode(encoded.trim())
        .map_err(|_| ProtocolError::SyntaxError)
}

fn text(bytes: &[u8]) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| ProtocolError::SyntaxError)
}
