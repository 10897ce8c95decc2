//! Operation dispatch: server selection, session plumbing, and the single-retry rule for
//! retryable writes.

use bson::Document;

use crate::{
    error::{Error, ErrorKind, Result, RETRYABLE_WRITE_ERROR},
    namespace::Namespace,
    options::{CommandOptions, ServerAddress, WriteOptions},
    sdam::Topology,
    selection_criteria::{ReadPreference, SelectionCriteria},
    session::Session,
    transport::{CommandRequest, SessionInfo, WriteBody, WriteRequest},
};

/// The command names that identify a retryable write when they appear at the top level of a
/// dispatched command.
const RETRYABLE_WRITE_COMMANDS: &[&str] = &["findAndModify", "insert", "update", "delete"];

/// State carried across the two attempts of a retried operation.
struct ExecutionRetry {
    prior_txn_number: Option<i64>,
    first_error: Error,
    first_server: ServerAddress,
}

#[derive(Clone)]
enum OperationBody {
    Command {
        db: String,
        command: Document,
        read_preference: ReadPreference,
    },
    Write {
        namespace: Namespace,
        body: WriteBody,
        ordered: Option<bool>,
    },
}

impl OperationBody {
    fn supports_retryable_write(&self) -> bool {
        match self {
            OperationBody::Command { command, .. } => RETRYABLE_WRITE_COMMANDS
                .iter()
                .any(|name| command.contains_key(*name)),
            OperationBody::Write { .. } => true,
        }
    }
}

impl Topology {
    /// Runs a database command against a server chosen by the resolved read preference
    /// (default `primary`).
    ///
    /// When `retry_writes` is set, a session is provided and outside a transaction, the
    /// deployment supports retryable writes, and the command is one of `findAndModify`,
    /// `insert`, `update`, or `delete`, the command is dispatched with a transaction number and
    /// retried at most once on a retryable failure. The transaction number is assigned before
    /// the first attempt and shared by both.
    pub async fn command(
        &self,
        ns: &Namespace,
        command: Document,
        options: CommandOptions,
        session: Option<&mut Session>,
    ) -> Result<Document> {
        let read_preference = options
            .read_preference
            .clone()
            .unwrap_or(ReadPreference::Primary);
        let criteria = SelectionCriteria::ReadPreference(read_preference.clone());
        let body = OperationBody::Command {
            db: ns.db.clone(),
            command,
            read_preference,
        };
        self.execute_operation(criteria, body, options.retry_writes, session)
            .await
    }

    /// Inserts the given documents, selecting a writable server. Subject to the same
    /// single-retry rule as [`Topology::command`].
    pub async fn insert(
        &self,
        ns: &Namespace,
        documents: Vec<Document>,
        options: WriteOptions,
        session: Option<&mut Session>,
    ) -> Result<Document> {
        self.write(ns, WriteBody::Insert { documents }, options, session)
            .await
    }

    /// Applies the given update statements, selecting a writable server.
    pub async fn update(
        &self,
        ns: &Namespace,
        statements: Vec<Document>,
        options: WriteOptions,
        session: Option<&mut Session>,
    ) -> Result<Document> {
        self.write(ns, WriteBody::Update { statements }, options, session)
            .await
    }

    /// Applies the given delete statements, selecting a writable server.
    pub async fn remove(
        &self,
        ns: &Namespace,
        statements: Vec<Document>,
        options: WriteOptions,
        session: Option<&mut Session>,
    ) -> Result<Document> {
        self.write(ns, WriteBody::Delete { statements }, options, session)
            .await
    }

    async fn write(
        &self,
        ns: &Namespace,
        body: WriteBody,
        options: WriteOptions,
        session: Option<&mut Session>,
    ) -> Result<Document> {
        let criteria = SelectionCriteria::ReadPreference(ReadPreference::Primary);
        let body = OperationBody::Write {
            namespace: ns.clone(),
            body,
            ordered: options.ordered,
        };
        self.execute_operation(criteria, body, options.retry_writes, session)
            .await
    }

    async fn execute_operation(
        &self,
        criteria: SelectionCriteria,
        body: OperationBody,
        retry_writes: bool,
        mut session: Option<&mut Session>,
    ) -> Result<Document> {
        if let Some(ref session) = session {
            if session.is_ended() {
                return Err(Error::invalid_argument("cannot use an ended session"));
            }
        }

        let mut retry: Option<ExecutionRetry> = None;
        loop {
            let server = match self
                .select_server_with(Some(&criteria), retry.as_ref().map(|r| &r.first_server))
                .await
            {
                Ok(server) => server,
                // The retried attempt failing to select reports the original error.
                Err(err) => match retry {
                    Some(retry) => return Err(retry.first_error),
                    None => return Err(err),
                },
            };

            let state = self.watcher.peek_latest();
            if session.is_some() && !state.description.has_session_support() {
                return Err(ErrorKind::SessionsNotSupported.into());
            }

            let retryable = retry_writes
                && body.supports_retryable_write()
                && session.as_ref().map(|s| !s.in_transaction()).unwrap_or(false)
                && state.description.supports_retryable_writes();

            // The transaction number is assigned once, before the first attempt.
            let txn_number = if retryable {
                match retry {
                    Some(ref r) => r.prior_txn_number,
                    None => session.as_mut().map(|s| s.get_and_increment_txn_number()),
                }
            } else {
                None
            };

            let session_info = session.as_ref().map(|s| SessionInfo {
                id: s.id().clone(),
                txn_number,
                will_retry_write: retryable,
            });

            let result = match body.clone() {
                OperationBody::Command {
                    db,
                    command,
                    read_preference,
                } => {
                    server
                        .run_command(CommandRequest {
                            db,
                            command,
                            read_preference: Some(read_preference),
                            session: session_info,
                        })
                        .await
                }
                OperationBody::Write {
                    namespace,
                    body,
                    ordered,
                } => {
                    server
                        .run_write(WriteRequest {
                            namespace,
                            body,
                            ordered,
                            session: session_info,
                        })
                        .await
                }
            };

            match result {
                Ok(reply) => return Ok(reply),
                Err(mut err) => {
                    let address = server.address().clone();
                    let max_wire_version = state
                        .description
                        .get_server_description(&address)
                        .and_then(|sd| sd.max_wire_version().ok().flatten())
                        .unwrap_or(0);

                    if err.is_network_error() {
                        if let Some(ref mut session) = session {
                            session.mark_dirty();
                        }
                    }

                    self.updater
                        .handle_application_error(address.clone(), err.clone())
                        .await;
                    // Release the selected server to decrement its operation count.
                    drop(server);

                    if retryable && err.should_add_retryable_write_label(max_wire_version) {
                        err.add_label(RETRYABLE_WRITE_ERROR);
                    }

                    if retry.is_some() {
                        return Err(err);
                    } else if retryable && err.is_write_retryable() {
                        tracing::debug!(%address, "retrying write after retryable error");
                        retry = Some(ExecutionRetry {
                            prior_txn_number: txn_number,
                            first_error: err,
                            first_server: address,
                        });
                        continue;
                    } else {
                        return Err(err);
                    }
                }
            }
        }
    }
}
