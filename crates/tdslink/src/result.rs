//! Streaming access to the response of one SQL batch.

use std::sync::Arc;

use tdslink_protocol::{ServerMessage, Token};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::row::{Column, Row};
use crate::session::Session;

enum Event {
    Metadata,
    Row(Row),
    Done,
    ResponseEnd,
}

/// Response of one batch: zero or more result sets, read front to back.
///
/// Rows are decoded as they are pulled. The result borrows its session
/// exclusively; dropping it early is allowed, and the session discards the
/// unread remainder before its next request.
pub struct BatchResult<'a, S = TcpStream> {
    session: &'a mut Session<S>,
    columns: Arc<[Column]>,
    in_result_set: bool,
    metadata_pending: bool,
    complete: bool,
    rows_affected: u64,
    return_status: Option<i32>,
    messages: Vec<ServerMessage>,
}

impl<'a, S> BatchResult<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Position on the first result set of a response the session has just
    /// started reading.
    pub(crate) async fn start(session: &'a mut Session<S>) -> Result<Self> {
        let mut result = Self {
            session,
            columns: Arc::from(Vec::new()),
            in_result_set: false,
            metadata_pending: false,
            complete: false,
            rows_affected: 0,
            return_status: None,
            messages: Vec::new(),
        };
        result.advance().await?;
        Ok(result)
    }

    /// Columns of the current result set; empty when there is none.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether a result set is positioned and may still yield rows.
    #[must_use]
    pub fn has_result_set(&self) -> bool {
        self.in_result_set
    }

    /// Sum of the row counts reported by DONE tokens read so far.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// RETURNSTATUS of a procedure call, if one was read.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// Informational messages (PRINT, warnings) read so far.
    #[must_use]
    pub fn messages(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Whether the whole response has been read.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Next row of the current result set, `None` at its end.
    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        if !self.in_result_set {
            return Ok(None);
        }
        loop {
            match self.next_event().await? {
                Event::Row(row) => return Ok(Some(row)),
                Event::Metadata => {
                    self.metadata_pending = true;
                    self.in_result_set = false;
                    return Ok(None);
                }
                Event::Done | Event::ResponseEnd => {
                    self.in_result_set = false;
                    return Ok(None);
                }
            }
        }
    }

    /// Skip the rest of the current result set and move to the next one.
    ///
    /// Returns `false` when the response has no further result sets.
    pub async fn next_result(&mut self) -> Result<bool> {
        while self.next_row().await?.is_some() {}
        self.advance().await
    }

    /// Collect the remaining rows of the current result set, then read the
    /// rest of the response so errors in later statements surface here.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row().await? {
            rows.push(row);
        }
        self.finish().await?;
        Ok(rows)
    }

    /// Read the rest of the response, discarding rows, and return the total
    /// row count.
    pub async fn finish(mut self) -> Result<u64> {
        while !self.complete {
            self.next_event().await?;
        }
        Ok(self.rows_affected)
    }

    async fn advance(&mut self) -> Result<bool> {
        if std::mem::take(&mut self.metadata_pending) {
            self.in_result_set = true;
            return Ok(true);
        }
        loop {
            match self.next_event().await? {
                Event::Metadata => {
                    self.in_result_set = true;
                    return Ok(true);
                }
                Event::Row(_) | Event::Done => {}
                Event::ResponseEnd => {
                    self.columns = Arc::from(Vec::new());
                    return Ok(false);
                }
            }
        }
    }

    async fn next_event(&mut self) -> Result<Event> {
        loop {
            let Some(token) = self.session.next_token().await? else {
                self.complete = true;
                return Ok(Event::ResponseEnd);
            };
            match token {
                Token::ColMetaData(meta) => {
                    tracing::debug!(columns = meta.len(), "received column metadata");
                    self.columns = Column::from_metadata(&meta);
                    return Ok(Event::Metadata);
                }
                Token::Row(row) | Token::NbcRow(row) => {
                    return Ok(Event::Row(Row::new(Arc::clone(&self.columns), row.values)));
                }
                Token::Done(done) | Token::DoneProc(done) | Token::DoneInProc(done) => {
                    if let Some(count) = done.rows_affected() {
                        self.rows_affected += count;
                    }
                    return Ok(Event::Done);
                }
                Token::Error(msg) => {
                    tracing::debug!(number = msg.number, class = msg.class, message = %msg.message, "server error");
                    let mut error = Error::from_server_message(&msg);
                    match self.session.drain().await {
                        Ok(drained) => {
                            self.rows_affected += drained.rows_affected;
                            error = error.with_completion(drained.first_done, self.rows_affected);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "failed to drain response after server error");
                        }
                    }
                    self.complete = true;
                    self.in_result_set = false;
                    return Err(self.session.poison(error));
                }
                Token::Info(msg) => {
                    if msg.class > 10 {
                        tracing::warn!(number = msg.number, class = msg.class, message = %msg.message, "server message");
                    } else {
                        tracing::debug!(number = msg.number, message = %msg.message, "server message");
                    }
                    self.messages.push(msg);
                }
                Token::ReturnStatus(status) => self.return_status = Some(status),
                Token::LoginAck(_) | Token::EnvChange(_) | Token::Order(_) => {}
            }
        }
    }
}

impl<S> std::fmt::Debug for BatchResult<'_, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchResult")
            .field("columns", &self.columns.len())
            .field("in_result_set", &self.in_result_set)
            .field("complete", &self.complete)
            .field("rows_affected", &self.rows_affected)
            .finish_non_exhaustive()
    }
}
