//! Helpdesk terminal client.
//!
//! Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY` (and optional `HELPDESK_*`
//! settings) from the environment or a `.env` file, then runs the shell on
//! stdin/stdout. Logs go to stderr; set `RUST_LOG` to change the level.

use helpdesk::features::{ItemsEnvironment, SessionEnvironment, TicketsEnvironment};
use helpdesk::shell::Shell;
use helpdesk::{Config, Item, ItemService, SupabaseAuth, SupabaseRepository, Ticket, TicketService};
use helpdesk_supabase::{
    AuthClient, FileSessionStorage, MemorySessionStorage, SessionStorage, SupabaseClient,
};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "helpdesk=info,helpdesk_supabase=info,helpdesk_runtime=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        url = %config.supabase_url,
        persist_session = config.persist_session,
        "Configuration loaded"
    );

    let client = SupabaseClient::new(config.supabase());
    let storage: Arc<dyn SessionStorage> = if config.persist_session {
        Arc::new(FileSessionStorage::new(config.session_file.clone()))
    } else {
        Arc::new(MemorySessionStorage::new())
    };
    let auth = SupabaseAuth::new(
        AuthClient::new(client.clone(), storage),
        config.redirect_url.clone(),
    );

    let tickets = SupabaseRepository::<Ticket>::new(client.clone())
        .with_subscribe_retry(config.subscribe_retry());
    let items =
        SupabaseRepository::<Item>::new(client).with_subscribe_retry(config.subscribe_retry());

    let shell = Shell::new(
        SessionEnvironment::new(Arc::new(auth)),
        TicketsEnvironment::new(Arc::new(TicketService::new(tickets))),
        ItemsEnvironment::new(Arc::new(ItemService::new(items)), config.edit_debounce),
    );

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    shell.run(stdin, &mut stdout).await?;

    tracing::info!("Bye");
    Ok(())
}
