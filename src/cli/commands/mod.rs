pub mod auth;
pub mod logging;

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Arg, ArgAction, ColorChoice, Command,
};

pub const ARG_PORT: &str = "port";
pub const ARG_DSN: &str = "dsn";
pub const ARG_MEMORY_STORE: &str = "memory-store";
pub const ARG_CORS_ORIGIN: &str = "cors-origin";

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!("{} - {}", env!("CARGO_PKG_VERSION"), crate::GIT_COMMIT_HASH).into_boxed_str(),
    );

    let command = Command::new("todo-auth")
        .about("Authentication and session trust for the todo app")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("8080")
                .env("TODO_AUTH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_DSN)
                .short('d')
                .long(ARG_DSN)
                .help("Database connection string")
                .env("TODO_AUTH_DSN")
                .required_unless_present(ARG_MEMORY_STORE),
        )
        .arg(
            Arg::new(ARG_MEMORY_STORE)
                .long(ARG_MEMORY_STORE)
                .help("Keep accounts in process memory instead of Postgres")
                .long_help(
                    "Keep accounts in process memory instead of Postgres. Accounts are lost on restart; intended for local development and demos.",
                )
                .env("TODO_AUTH_MEMORY_STORE")
                .action(ArgAction::SetTrue)
                .conflicts_with(ARG_DSN),
        )
        .arg(
            Arg::new(ARG_CORS_ORIGIN)
                .long(ARG_CORS_ORIGIN)
                .help("Origin allowed to call the API with credentials (repeatable or comma separated)")
                .env("TODO_AUTH_CORS_ORIGIN")
                .action(ArgAction::Append)
                .value_delimiter(',')
                .default_value("http://localhost:3000"),
        );

    let command = auth::with_args(command);
    logging::with_args(command)
}
