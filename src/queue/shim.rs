//! Server-side dequeue shim.
//!
//! `aq.dequeue` reports its message id and payload through composite OUT
//! parameters the driver cannot bind. The shim function calls it and parks
//! every output in transaction-local settings, which are then read back one
//! scalar at a time on the same transaction.
//!
//! The function name is fixed per schema. Two service processes sharing a
//! schema may recreate it concurrently; nothing here guards against that.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Postgres, Transaction};

use crate::error::{DispatchError, Result};

use super::models::QueueMessage;

/// SQLSTATE raised by the queue engine when no message arrived in time.
pub const QUEUE_EMPTY_CODE: &str = "25228";

pub const SHIM_FUNCTION: &str = "dispatch_dequeue_shim";

const CREATE_SHIM_SQL: &str = r#"
CREATE OR REPLACE FUNCTION dispatch_dequeue_shim(
    p_wait_seconds double precision,
    p_consumer_name text,
    p_queue_name text
) RETURNS void
LANGUAGE plpgsql
AS $shim$
DECLARE
    v_msgid bytea;
    v_payload xml;
BEGIN
    PERFORM set_config('dispatch_shim.success', 'false', true);
    PERFORM set_config('dispatch_shim.error_code', '', true);
    PERFORM set_config('dispatch_shim.error_message', '', true);
    PERFORM set_config('dispatch_shim.msgid', '', true);
    PERFORM set_config('dispatch_shim.payload', '', true);

    BEGIN
        CALL aq.dequeue(
            p_queue_name,
            p_consumer_name,
            p_wait_seconds,
            'REMOVE',
            'FIRST_MESSAGE',
            v_msgid,
            v_payload
        );
        PERFORM set_config('dispatch_shim.msgid', coalesce(upper(encode(v_msgid, 'hex')), ''), true);
        PERFORM set_config('dispatch_shim.payload', coalesce(v_payload::text, ''), true);
        PERFORM set_config('dispatch_shim.success', 'true', true);
    EXCEPTION WHEN OTHERS THEN
        PERFORM set_config('dispatch_shim.error_code', SQLSTATE, true);
        PERFORM set_config('dispatch_shim.error_message', SQLERRM, true);
    END;
END;
$shim$
"#;

const INVOKE_SQL: &str = "SELECT dispatch_dequeue_shim($1, $2, $3)";
const READ_SUCCESS_SQL: &str = "SELECT current_setting('dispatch_shim.success', true)";
const READ_ERROR_CODE_SQL: &str = "SELECT current_setting('dispatch_shim.error_code', true)";
const READ_ERROR_MESSAGE_SQL: &str = "SELECT current_setting('dispatch_shim.error_message', true)";
const FETCH_MESSAGE_SQL: &str = "SELECT current_setting('dispatch_shim.msgid', true), \
     current_setting('dispatch_shim.payload', true) \
     WHERE coalesce(current_setting('dispatch_shim.msgid', true), '') <> ''";

/// Parameters of one dequeue attempt.
#[derive(Debug, Clone)]
pub struct DequeueRequest {
    pub queue_name: String,
    /// `None` binds SQL NULL
    pub consumer_name: Option<String>,
    pub wait: Duration,
}

impl DequeueRequest {
    pub fn new(queue_name: &str, consumer_name: &str, wait: Duration) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            consumer_name: (!consumer_name.is_empty()).then(|| consumer_name.to_string()),
            wait,
        }
    }

    fn consumer_label(&self) -> String {
        self.consumer_name.clone().unwrap_or_default()
    }
}

/// Message id and payload text captured by the shim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShimRow {
    pub message_id: String,
    pub payload: String,
}

/// Result of one attempt that the engine did not fail.
#[derive(Debug)]
pub enum ShimOutcome {
    Message(QueueMessage),
    Empty,
}

/// Shim protocol calls on an open transaction.
///
/// All calls of one attempt must run on the same transaction: the captured
/// outputs are transaction-local.
#[async_trait]
pub trait ShimSession: Send {
    /// Create or replace the shim function.
    async fn install_shim(&mut self) -> std::result::Result<(), sqlx::Error>;

    async fn invoke_dequeue(
        &mut self,
        request: &DequeueRequest,
    ) -> std::result::Result<(), sqlx::Error>;

    async fn read_success(&mut self) -> std::result::Result<bool, sqlx::Error>;

    /// `None` when no error was captured.
    async fn read_error_code(&mut self) -> std::result::Result<Option<String>, sqlx::Error>;

    async fn read_error_message(&mut self) -> std::result::Result<Option<String>, sqlx::Error>;

    /// The captured message, or `None` when nothing was dequeued.
    async fn fetch_message(&mut self) -> std::result::Result<Option<ShimRow>, sqlx::Error>;
}

/// Run one dequeue attempt and interpret the captured outputs.
///
/// The queue-empty code becomes [`ShimOutcome::Empty`]; any other captured
/// code is a [`DispatchError::QueueEngine`].
pub async fn dequeue_once<S>(session: &mut S, request: &DequeueRequest) -> Result<ShimOutcome>
where
    S: ShimSession + ?Sized,
{
    session.invoke_dequeue(request).await?;

    let success = session.read_success().await?;
    let code = session.read_error_code().await?;
    let message = session.read_error_message().await?;

    if let Some(code) = code {
        if code == QUEUE_EMPTY_CODE {
            return Ok(ShimOutcome::Empty);
        }
        return Err(DispatchError::QueueEngine {
            queue: request.queue_name.clone(),
            consumer: request.consumer_label(),
            wait: request.wait,
            code,
            message: message.unwrap_or_default(),
        });
    }

    if !success {
        tracing::debug!(queue = %request.queue_name, "Shim reported neither success nor error");
        return Ok(ShimOutcome::Empty);
    }

    match session.fetch_message().await? {
        Some(row) => Ok(ShimOutcome::Message(QueueMessage::new(
            row.message_id,
            row.payload,
        ))),
        None => Ok(ShimOutcome::Empty),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[async_trait]
impl ShimSession for Transaction<'static, Postgres> {
    async fn install_shim(&mut self) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(CREATE_SHIM_SQL).execute(&mut **self).await?;
        Ok(())
    }

    async fn invoke_dequeue(
        &mut self,
        request: &DequeueRequest,
    ) -> std::result::Result<(), sqlx::Error> {
        sqlx::query(INVOKE_SQL)
            .bind(request.wait.as_secs_f64())
            .bind(request.consumer_name.as_deref())
            .bind(request.queue_name.as_str())
            .execute(&mut **self)
            .await?;
        Ok(())
    }

    async fn read_success(&mut self) -> std::result::Result<bool, sqlx::Error> {
        let value: Option<String> = sqlx::query_scalar(READ_SUCCESS_SQL)
            .fetch_one(&mut **self)
            .await?;
        Ok(value.as_deref() == Some("true"))
    }

    async fn read_error_code(&mut self) -> std::result::Result<Option<String>, sqlx::Error> {
        let value: Option<String> = sqlx::query_scalar(READ_ERROR_CODE_SQL)
            .fetch_one(&mut **self)
            .await?;
        Ok(non_empty(value))
    }

    async fn read_error_message(&mut self) -> std::result::Result<Option<String>, sqlx::Error> {
        let value: Option<String> = sqlx::query_scalar(READ_ERROR_MESSAGE_SQL)
            .fetch_one(&mut **self)
            .await?;
        Ok(non_empty(value))
    }

    async fn fetch_message(&mut self) -> std::result::Result<Option<ShimRow>, sqlx::Error> {
        let row: Option<(String, Option<String>)> = sqlx::query_as(FETCH_MESSAGE_SQL)
            .fetch_optional(&mut **self)
            .await?;
        Ok(row.map(|(message_id, payload)| ShimRow {
            message_id,
            payload: payload.unwrap_or_default(),
        }))
    }
}
