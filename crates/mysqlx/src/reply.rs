//! Request/reply dispatcher.
//!
//! Each submitted request opens one `ReplyStream`: a lazy, ordered sequence
//! of typed events ending with `Done` on the request family's terminal
//! frame. Column metadata always precedes the rows of its result set, and
//! result-set boundaries arrive as metadata between them. Session-state
//! notices are folded into the statement summary instead of being yielded;
//! all other notices come through the `Notice` variant.
//!
//! The stream mutably borrows the open session, so a second request cannot
//! be submitted while one stream is live, and once consumed the stream is
//! exhausted for good.

use std::mem;

use mysqlx_core::error::{Error, ProtocolError, ProtocolErrorKind};

use crate::connection::Connection;
use crate::protocol::{
    reader, ClientMessage, NoticeFrame, Scalar, ServerMessage, SessionStateParam, Warning,
};

/// Counters and identity updates accumulated from session-state notices.
#[derive(Debug, Default)]
pub(crate) struct SessionTracker {
    pub(crate) summary: StatementSummary,
    pub(crate) current_schema: Option<String>,
    pub(crate) client_id: Option<u64>,
    /// Set when a terminal error or transport failure ends the stream; the
    /// session transitions to Closed on its next operation.
    pub(crate) fatal: bool,
}

/// Per-statement outcome, assembled from session-state notices and handed
/// over with the terminal `Done` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementSummary {
    pub rows_affected: Option<u64>,
    pub generated_insert_id: Option<u64>,
    pub generated_document_ids: Vec<String>,
    pub produced_message: Option<String>,
}

/// One event of a reply stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyEvent {
    /// Metadata: column definitions and result-set boundaries
    Meta(MetaEvent),
    /// One data row, payload left opaque for the row decoder above
    Row(Vec<u8>),
    /// An out-of-band notice that is not a session-state change
    Notice(Notice),
    /// Terminal event carrying the statement summary
    Done(StatementSummary),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaEvent {
    /// One column definition, payload left opaque
    Column(Vec<u8>),
    /// End of the current result set
    ResultsetEnd {
        /// More result sets follow in the same stream
        more_resultsets: bool,
    },
    /// End of result sets; out-parameters follow
    OutParamsFollow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Warning(Warning),
    Other(NoticeFrame),
}

/// Which frame closes the stream for the submitted request family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Terminal {
    /// Statement family: closes on `StmtExecuteOk`
    Statement,
    /// Administrative requests: close on plain `Ok`
    Admin,
}

impl Terminal {
    pub(crate) fn for_request(type_id: u8) -> Self {
        match ClientMessage::from_u8(type_id) {
            Some(msg) if !msg.is_statement_family() => Terminal::Admin,
            // Unknown type ids come from higher-layer statement verbs.
            _ => Terminal::Statement,
        }
    }
}

/// A lazy, finite sequence of reply events scoped to one request.
pub struct ReplyStream<'a> {
    conn: &'a mut Connection,
    tracker: &'a mut SessionTracker,
    terminal: Terminal,
    done: bool,
}

impl<'a> std::fmt::Debug for ReplyStream<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyStream")
            .field("conn", &self.conn)
            .field("tracker", &self.tracker)
            .field("terminal", &self.terminal)
            .field("done", &self.done)
            .finish()
    }
}

impl<'a> ReplyStream<'a> {
    pub(crate) fn new(
        conn: &'a mut Connection,
        tracker: &'a mut SessionTracker,
        terminal: Terminal,
    ) -> Self {
        Self {
            conn,
            tracker,
            terminal,
            done: false,
        }
    }

    /// End the stream on a non-recoverable failure: release the stream
    /// first, then surface the error.
    fn fail(&mut self, err: Error) -> Option<Result<ReplyEvent, Error>> {
        self.done = true;
        self.tracker.fatal = true;
        let _ = self.conn.close();
        Some(Err(err))
    }
}

impl Iterator for ReplyStream<'_> {
    type Item = Result<ReplyEvent, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let msg = match self.conn.receive() {
                Ok(msg) => msg,
                Err(err) => return self.fail(err),
            };

            match msg.server_type() {
                Some(ServerMessage::Notice) => {
                    let frame = match reader::decode_notice_frame(&msg.payload) {
                        Ok(frame) => frame,
                        Err(err) => return self.fail(err),
                    };
                    match frame.notice_type {
                        NoticeFrame::SESSION_STATE_CHANGED => {
                            match reader::decode_session_state_changed(&frame.payload) {
                                Ok(change) => {
                                    apply_state_change(self.tracker, change.param, change.values);
                                }
                                Err(err) => return self.fail(err),
                            }
                            // Applied to session state, not delivered.
                            continue;
                        }
                        NoticeFrame::WARNING => match reader::decode_warning(&frame.payload) {
                            Ok(warning) => {
                                return Some(Ok(ReplyEvent::Notice(Notice::Warning(warning))))
                            }
                            Err(err) => return self.fail(err),
                        },
                        _ => return Some(Ok(ReplyEvent::Notice(Notice::Other(frame)))),
                    }
                }
                Some(ServerMessage::ColumnMetaData) => {
                    return Some(Ok(ReplyEvent::Meta(MetaEvent::Column(msg.payload))));
                }
                Some(ServerMessage::Row) => return Some(Ok(ReplyEvent::Row(msg.payload))),
                Some(ServerMessage::FetchDone) => {
                    return Some(Ok(ReplyEvent::Meta(MetaEvent::ResultsetEnd {
                        more_resultsets: false,
                    })));
                }
                Some(ServerMessage::FetchDoneMoreResultsets) => {
                    return Some(Ok(ReplyEvent::Meta(MetaEvent::ResultsetEnd {
                        more_resultsets: true,
                    })));
                }
                Some(ServerMessage::FetchDoneMoreOutParams) => {
                    return Some(Ok(ReplyEvent::Meta(MetaEvent::OutParamsFollow)));
                }
                Some(ServerMessage::StmtExecuteOk) if self.terminal == Terminal::Statement => {
                    self.done = true;
                    let summary = mem::take(&mut self.tracker.summary);
                    return Some(Ok(ReplyEvent::Done(summary)));
                }
                Some(ServerMessage::Ok) if self.terminal == Terminal::Admin => {
                    self.done = true;
                    let summary = mem::take(&mut self.tracker.summary);
                    return Some(Ok(ReplyEvent::Done(summary)));
                }
                Some(ServerMessage::Error) => {
                    let err = match reader::decode_error(&msg.payload) {
                        Ok(server) => Error::Server(server),
                        Err(err) => err,
                    };
                    return self.fail(err);
                }
                _ => {
                    return self.fail(Error::Protocol(ProtocolError {
                        kind: ProtocolErrorKind::UnexpectedMessage,
                        message: format!(
                            "unexpected message type {} in reply stream",
                            msg.type_id
                        ),
                    }));
                }
            }
        }
    }
}

fn apply_state_change(tracker: &mut SessionTracker, param: SessionStateParam, values: Vec<Scalar>) {
    let first = values.first();
    match param {
        SessionStateParam::RowsAffected => {
            tracker.summary.rows_affected = first.and_then(Scalar::as_u64);
        }
        SessionStateParam::GeneratedInsertId => {
            tracker.summary.generated_insert_id = first.and_then(Scalar::as_u64);
        }
        SessionStateParam::ProducedMessage => {
            tracker.summary.produced_message = first.and_then(|s| s.as_str().map(str::to_owned));
        }
        SessionStateParam::GeneratedDocumentIds => {
            tracker.summary.generated_document_ids = values
                .iter()
                .filter_map(|value| match value {
                    Scalar::String(s) => Some(s.clone()),
                    Scalar::Octets(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    _ => None,
                })
                .collect();
        }
        SessionStateParam::CurrentSchema => {
            tracker.current_schema = first.and_then(|s| s.as_str().map(str::to_owned));
        }
        SessionStateParam::ClientIdAssigned => {
            tracker.client_id = first.and_then(Scalar::as_u64);
        }
        SessionStateParam::AccountExpired | SessionStateParam::Other(_) => {}
    }
}

/// Push adapter: drain a stream into `row_sink` and `meta_sink`.
///
/// `row_sink` sees every data row; `meta_sink` sees everything else,
/// including the terminal `Done`. Returns the statement summary, or the
/// typed failure that ended the stream.
pub fn deliver<R, M>(
    mut stream: ReplyStream<'_>,
    mut row_sink: R,
    mut meta_sink: M,
) -> Result<StatementSummary, Error>
where
    R: FnMut(Vec<u8>),
    M: FnMut(ReplyEvent),
{
    for event in stream.by_ref() {
        match event? {
            ReplyEvent::Row(row) => row_sink(row),
            ReplyEvent::Done(summary) => {
                meta_sink(ReplyEvent::Done(summary.clone()));
                return Ok(summary);
            }
            other => meta_sink(other),
        }
    }
    Err(Error::Protocol(ProtocolError {
        kind: ProtocolErrorKind::UnexpectedMessage,
        message: "reply stream ended without a terminal frame".to_string(),
    }))
}
