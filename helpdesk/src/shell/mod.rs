//! Terminal shell: reads commands, dispatches them to the feature stores,
//! and prints what the feeds deliver.
//!
//! Feeds follow the session. Signing in loads both lists and starts their
//! change feeds; signing out stops them.

pub mod command;
pub mod render;

pub use command::{Command, CommandError, RowRef};

use crate::domain::{Item, Ticket};
use crate::features::{
    ItemsAction, ItemsEnvironment, ItemsReducer, ItemsState, SessionAction, SessionEnvironment,
    SessionReducer, SessionState, TicketsAction, TicketsEnvironment, TicketsReducer, TicketsState,
};
use crate::repository::Repository;
use crate::service::AuthProvider;
use helpdesk_runtime::{Store, StoreError as RuntimeError};
use std::io::Write;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast;

/// How long quitting waits for unsaved item edits to be written
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// The shell stopped.
#[derive(Debug, Error)]
pub enum ShellError {
    /// A store refused an action
    #[error(transparent)]
    Store(#[from] RuntimeError),

    /// Terminal I/O failed
    #[error("Terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether to keep reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Session store of the shell
pub type SessionStore<A> =
    Store<SessionState, SessionAction, SessionEnvironment<A>, SessionReducer<A>>;

/// Tickets store of the shell
pub type TicketsStore<T> =
    Store<TicketsState, TicketsAction, TicketsEnvironment<T>, TicketsReducer<T>>;

/// Items store of the shell
pub type ItemsStore<I> = Store<ItemsState, ItemsAction, ItemsEnvironment<I>, ItemsReducer<I>>;

/// The interactive shell.
pub struct Shell<A, T, I>
where
    A: AuthProvider + 'static,
    T: Repository<Ticket> + 'static,
    I: Repository<Item> + 'static,
{
    session: SessionStore<A>,
    tickets: TicketsStore<T>,
    items: ItemsStore<I>,
}

impl<A, T, I> Shell<A, T, I>
where
    A: AuthProvider + 'static,
    T: Repository<Ticket> + 'static,
    I: Repository<Item> + 'static,
{
    /// Create a shell over the three feature environments
    #[must_use]
    pub fn new(
        session: SessionEnvironment<A>,
        tickets: TicketsEnvironment<T>,
        items: ItemsEnvironment<I>,
    ) -> Self {
        Self {
            session: Store::new(SessionState::default(), SessionReducer::new(), session),
            tickets: Store::with_broadcast_capacity(
                TicketsState::default(),
                TicketsReducer::new(),
                tickets,
                256,
            ),
            items: Store::with_broadcast_capacity(
                ItemsState::default(),
                ItemsReducer::new(),
                items,
                256,
            ),
        }
    }

    /// The session store
    #[must_use]
    pub const fn session(&self) -> &SessionStore<A> {
        &self.session
    }

    /// The tickets store
    #[must_use]
    pub const fn tickets(&self) -> &TicketsStore<T> {
        &self.tickets
    }

    /// The items store
    #[must_use]
    pub const fn items(&self) -> &ItemsStore<I> {
        &self.items
    }

    /// Read commands from `input` until it ends or `quit`, writing to `out`.
    ///
    /// Unsaved item edits are written before returning; every store is torn
    /// down afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError`] if the terminal fails or a store was torn down
    /// underneath the shell.
    pub async fn run<R, W>(&self, input: R, out: &mut W) -> Result<(), ShellError>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let mut session_events = self.session.subscribe_actions();
        let mut ticket_events = self.tickets.subscribe_actions();
        let mut item_events = self.items.subscribe_actions();
        let mut feeds_on = false;

        self.session.send(SessionAction::WatchSession).await?;
        self.session.send(SessionAction::Restore).await?;
        writeln!(out, "helpdesk: type `help` for commands")?;

        let result = loop {
            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => match self.execute(&line, out).await {
                        Ok(Flow::Continue) => {},
                        Ok(Flow::Quit) => break Ok(()),
                        Err(error) => break Err(error),
                    },
                    Ok(None) => break Ok(()),
                    Err(error) => break Err(error.into()),
                },
                event = session_events.recv() => {
                    if let Some(action) = received(event) {
                        self.on_session(&action, out).await?;
                        feeds_on = self.follow_session(feeds_on).await?;
                    }
                },
                event = ticket_events.recv() => {
                    if let Some(action) = received(event) {
                        self.on_tickets(&action, out).await?;
                    }
                },
                event = item_events.recv() => {
                    if let Some(action) = received(event) {
                        self.on_items(&action, out).await?;
                    }
                },
            }
        };

        self.flush_edits().await;
        self.session.teardown();
        self.tickets.teardown();
        self.items.teardown();
        result
    }

    /// Parse and dispatch one line
    async fn execute<W: Write>(&self, line: &str, out: &mut W) -> Result<Flow, ShellError> {
        if line.trim().is_empty() {
            return Ok(Flow::Continue);
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(error) => {
                writeln!(out, "{error}")?;
                return Ok(Flow::Continue);
            },
        };

        let signed_in = self.session.state(SessionState::is_signed_in).await;
        if needs_session(&command) && !signed_in {
            writeln!(out, "Sign in first (`login <email>` or `password <email> <password>`)")?;
            return Ok(Flow::Continue);
        }

        match command {
            Command::Login { email } => {
                self.session.send(SessionAction::RequestLink { email }).await?;
            },
            Command::Verify { email, code } => {
                self.session.send(SessionAction::VerifyCode { email, code }).await?;
            },
            Command::Password { email, password } => {
                self.session
                    .send(SessionAction::SignInWithPassword { email, password })
                    .await?;
            },
            Command::SignUp { email, password } => {
                self.session.send(SessionAction::SignUp { email, password }).await?;
            },
            Command::Logout => {
                self.session.send(SessionAction::SignOut).await?;
            },
            Command::WhoAmI => {
                let text = self.session.state(render::session).await;
                writeln!(out, "{text}")?;
            },
            Command::Tickets => {
                let text = self.tickets.state(render::tickets).await;
                write!(out, "{text}")?;
            },
            Command::Board => {
                let text = self.tickets.state(render::board).await;
                write!(out, "{text}")?;
            },
            Command::New(fields) => {
                if !fields.is_empty() {
                    let draft = command::draft_from(&fields);
                    self.tickets.send(TicketsAction::FillForm(draft)).await?;
                }
                self.tickets.send(TicketsAction::Submit).await?;
                let errors = self.tickets.state(|s| s.form_errors.clone()).await;
                for message in errors.messages() {
                    writeln!(out, "! {message}")?;
                }
            },
            Command::Next(reference) => {
                let id = self.tickets.state(|s| reference.ticket(s)).await;
                match id {
                    Some(id) => self.tickets.send(TicketsAction::MoveToNextStage(id)).await?,
                    None => return unknown(out, "ticket"),
                };
                self.report_ticket_error(out).await?;
            },
            Command::Move(reference, status) => {
                let id = self.tickets.state(|s| reference.ticket(s)).await;
                match id {
                    Some(id) => self.tickets.send(TicketsAction::MoveToStatus(id, status)).await?,
                    None => return unknown(out, "ticket"),
                };
                self.report_ticket_error(out).await?;
            },
            Command::Delete(reference) => {
                let id = self.tickets.state(|s| reference.ticket(s)).await;
                match id {
                    Some(id) => self.tickets.send(TicketsAction::Delete(id)).await?,
                    None => return unknown(out, "ticket"),
                };
            },
            Command::Items => {
                let text = self.items.state(render::items).await;
                write!(out, "{text}")?;
            },
            Command::Add(value) => {
                self.items.send(ItemsAction::SetDraft(value)).await?;
                self.items.send(ItemsAction::Create).await?;
            },
            Command::Edit(reference, value) => {
                let id = self.items.state(|s| reference.item(s)).await;
                match id {
                    Some(id) => self.items.send(ItemsAction::Edit { id, value }).await?,
                    None => return unknown(out, "item"),
                };
            },
            Command::Remove(reference) => {
                let id = self.items.state(|s| reference.item(s)).await;
                match id {
                    Some(id) => self.items.send(ItemsAction::Delete(id)).await?,
                    None => return unknown(out, "item"),
                };
            },
            Command::Help => writeln!(out, "{}", command::HELP)?,
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Print and clear a kanban error raised while reducing a command
    async fn report_ticket_error<W: Write>(&self, out: &mut W) -> Result<(), ShellError> {
        if let Some(error) = self.tickets.state(|s| s.error.clone()).await {
            writeln!(out, "! {error}")?;
            self.tickets.send(TicketsAction::DismissError).await?;
        }
        Ok(())
    }

    /// Start or stop the feeds when the signed-in user appears or leaves
    async fn follow_session(&self, feeds_on: bool) -> Result<bool, ShellError> {
        let signed_in = self.session.state(SessionState::is_signed_in).await;
        match (signed_in, feeds_on) {
            (true, false) => {
                self.tickets.send(TicketsAction::Load).await?;
                self.tickets.send(TicketsAction::Subscribe).await?;
                self.items.send(ItemsAction::Load).await?;
                self.items.send(ItemsAction::Subscribe).await?;
            },
            (false, true) => {
                self.tickets.send(TicketsAction::Unsubscribe).await?;
                self.items.send(ItemsAction::Unsubscribe).await?;
            },
            _ => {},
        }
        Ok(signed_in)
    }

    async fn on_session<W: Write>(
        &self,
        action: &SessionAction,
        out: &mut W,
    ) -> Result<(), ShellError> {
        let (info, error) = self.session.state(|s| (s.info.clone(), s.error.clone())).await;
        match action {
            // Sign-ins and sign-outs arrive again as session changes
            SessionAction::Restored(_) | SessionAction::SessionChanged(_) => {
                let text = self.session.state(render::session).await;
                writeln!(out, "{text}")?;
            },
            SessionAction::LinkSent(_)
            | SessionAction::SignedIn(Err(_))
            | SessionAction::SignedUp(_)
            | SessionAction::SignedOut(Err(_)) => {
                if let Some(info) = info {
                    writeln!(out, "{info}")?;
                }
                if let Some(error) = error {
                    writeln!(out, "! {error}")?;
                }
            },
            _ => {},
        }
        Ok(())
    }

    async fn on_tickets<W: Write>(
        &self,
        action: &TicketsAction,
        out: &mut W,
    ) -> Result<(), ShellError> {
        match action {
            TicketsAction::Loaded(Ok(tickets)) => writeln!(out, "{} ticket(s)", tickets.len())?,
            TicketsAction::Subscribed => writeln!(out, "Live ticket updates on")?,
            TicketsAction::FeedEnded => writeln!(out, "Live ticket updates stopped")?,
            TicketsAction::ChangeReceived(change) => {
                if let Some(line) = render::ticket_change(change) {
                    writeln!(out, "{line}")?;
                }
            },
            TicketsAction::Submitted(_) => {
                let errors = self.tickets.state(|s| s.form_errors.clone()).await;
                for message in errors.messages() {
                    writeln!(out, "! {message}")?;
                }
                self.report_ticket_error(out).await?;
            },
            TicketsAction::Loaded(Err(_))
            | TicketsAction::SubscriptionFailed(_)
            | TicketsAction::Moved(_, Err(_))
            | TicketsAction::Deleted(_, Err(_)) => self.report_ticket_error(out).await?,
            _ => {},
        }
        Ok(())
    }

    async fn on_items<W: Write>(
        &self,
        action: &ItemsAction,
        out: &mut W,
    ) -> Result<(), ShellError> {
        match action {
            ItemsAction::Loaded(Ok(items)) => writeln!(out, "{} item(s)", items.len())?,
            ItemsAction::ChangeReceived(change) => {
                if let Some(line) = render::item_change(change) {
                    writeln!(out, "{line}")?;
                }
            },
            ItemsAction::Loaded(Err(error))
            | ItemsAction::SubscriptionFailed(error)
            | ItemsAction::Created(Err(error))
            | ItemsAction::Saved(_, Err(error))
            | ItemsAction::Deleted(_, Err(error)) => writeln!(out, "! {error}")?,
            _ => {},
        }
        Ok(())
    }

    /// Write pending item edits now instead of after their debounce
    async fn flush_edits(&self) {
        let unsaved: Vec<_> = self.items.state(|s| s.unsaved.iter().cloned().collect()).await;
        for id in unsaved {
            match self.items.send(ItemsAction::Save(id.clone())).await {
                Ok(mut handle) => {
                    if handle.wait_with_timeout(FLUSH_TIMEOUT).await.is_err() {
                        tracing::warn!(%id, "Unsaved edit not written before exit");
                    }
                },
                Err(error) => tracing::warn!(%id, %error, "Unsaved edit dropped"),
            }
        }
    }
}

fn unknown<W: Write>(out: &mut W, what: &str) -> Result<Flow, ShellError> {
    writeln!(out, "No such {what}; list them with `{what}s`")?;
    Ok(Flow::Continue)
}

/// Commands that need a signed-in user
const fn needs_session(command: &Command) -> bool {
    !matches!(
        command,
        Command::Login { .. }
            | Command::Verify { .. }
            | Command::Password { .. }
            | Command::SignUp { .. }
            | Command::WhoAmI
            | Command::Help
            | Command::Quit
    )
}

/// An action from a store broadcast, skipping over lag
fn received<A>(event: Result<A, broadcast::error::RecvError>) -> Option<A> {
    match event {
        Ok(action) => Some(action),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "Shell fell behind the store");
            None
        },
        Err(broadcast::error::RecvError::Closed) => None,
    }
}
