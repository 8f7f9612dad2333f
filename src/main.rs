use std::io::{self, BufRead, Write};

use anyhow::{bail, Context, Result};
use clap::{ArgGroup, Parser};
use gauth::{config, Codes, PasswordSource, Session};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

const LOG_ENV: &str = "GAUTH_LOG";
const PROGRESS_WIDTH: usize = 29;

/// One-time codes from the command line.
///
/// Without flags, prints the previous, current and next code of every
/// configured account, or only of ACCOUNT when it is given.
#[derive(Parser, Debug)]
#[command(name = "gauth", version)]
#[command(group(ArgGroup::new("action").multiple(false)))]
struct Cli {
    /// Account name, matched ignoring case
    account: Option<String>,

    /// Print only the current code of ACCOUNT
    #[arg(short, long, group = "action", requires = "account")]
    bare: bool,

    /// Add ACCOUNT, reading its secret from stdin
    #[arg(short, long, group = "action", requires = "account")]
    add: bool,

    /// Remove ACCOUNT after confirmation
    #[arg(short, long, group = "action", requires = "account")]
    remove: bool,

    /// Print the secret of ACCOUNT
    #[arg(short, long, group = "action", requires = "account")]
    secret: bool,

    /// Encrypt the configuration file, or change its password
    #[arg(short, long, group = "action", conflicts_with = "account")]
    encrypt: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .init();
}

fn prompt_password() -> io::Result<Vec<u8>> {
    rpassword::prompt_password("Encryption password: ").map(String::into_bytes)
}

fn prompt_line(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\n', '\r']).to_string())
}

fn same_name(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn progress_bar(elapsed: u64) -> String {
    let filled = (elapsed as usize).min(PROGRESS_WIDTH);
    format!("[{:<width$}]", "=".repeat(filled), width = PROGRESS_WIDTH)
}

fn write_table(out: &mut impl Write, rows: &[(String, Codes)]) -> io::Result<()> {
    let nw = rows.iter().map(|(name, _)| name.chars().count()).max().unwrap_or(0);
    let cw = rows
        .iter()
        .map(|(_, codes)| codes.curr.len())
        .max()
        .unwrap_or(0)
        .max("prev".len());

    writeln!(out, "{:nw$} {:cw$} {:cw$} next", "", "prev", "curr")?;
    for (name, codes) in rows {
        writeln!(
            out,
            "{:nw$} {:cw$} {:cw$} {}",
            name, codes.prev, codes.curr, codes.next
        )?;
    }
    Ok(())
}

fn print_codes(session: &mut Session<impl PasswordSource>, filter: Option<&str>) -> Result<()> {
    let (_, elapsed) = gauth::current_time_step_and_elapsed().context("Reading the clock")?;

    let mut rows = Vec::new();
    for account in session.accounts().context("Loading config")? {
        if filter.is_some_and(|name| !same_name(&account.account_name, name)) {
            continue;
        }
        let codes = gauth::codes(account)
            .with_context(|| format!("Generating codes for {:?}", account.account_name))?;
        rows.push((account.account_name.clone(), codes));
    }
    if let (Some(name), true) = (filter, rows.is_empty()) {
        bail!("No account named {:?}", name);
    }

    let mut out = io::stdout().lock();
    write_table(&mut out, &rows)?;
    writeln!(out, "{}", progress_bar(elapsed))?;
    Ok(())
}

fn print_bare_code(session: &mut Session<impl PasswordSource>, name: &str) -> Result<()> {
    let account = session
        .find(name)
        .context("Loading config")?
        .with_context(|| format!("No account named {:?}", name))?;
    let codes = gauth::codes(account)
        .with_context(|| format!("Generating codes for {:?}", account.account_name))?;
    println!("{}", codes.curr);
    Ok(())
}

fn print_secret(session: &mut Session<impl PasswordSource>, name: &str) -> Result<()> {
    let account = session
        .find(name)
        .context("Loading config")?
        .with_context(|| format!("No account named {:?}", name))?;
    println!("{}", account.raw_secret);
    Ok(())
}

fn add_account(session: &mut Session<impl PasswordSource>, name: &str) -> Result<()> {
    // Open the file before asking for the key, so the password prompt comes first.
    match session.contents() {
        Err(e) if !e.is_not_found() => return Err(e).context("Loading config"),
        _ => {}
    }

    let key = Zeroizing::new(prompt_line(&format!("Key for {}: ", name))?);
    let account = session
        .add_account(name, &key)
        .with_context(|| format!("Adding {:?}", name))?;
    let codes = gauth::codes(&account)
        .with_context(|| format!("Generating codes for {:?}", account.account_name))?;
    println!("Current OTP for {}: {}", account.account_name, codes.curr);
    Ok(())
}

fn remove_account(session: &mut Session<impl PasswordSource>, name: &str) -> Result<()> {
    if session.find(name).context("Loading config")?.is_none() {
        println!("Account \"{}\" was not found. Nothing has been removed.", name);
        return Ok(());
    }

    let answer = prompt_line(&format!("Are you sure you want to remove {} [y/N]: ", name))?;
    if !answer.trim().eq_ignore_ascii_case("y") {
        return Ok(());
    }
    session
        .remove_account(name)
        .with_context(|| format!("Removing {:?}", name))?;
    println!("{} has been removed.", name);
    Ok(())
}

fn encrypt(session: &mut Session<impl PasswordSource>) -> Result<()> {
    if session.is_encrypted().context("Loading config")? {
        println!("{} is already encrypted, changing its password.", session.path().display());
    }
    session.contents().context("Loading config")?;

    let password = Zeroizing::new(rpassword::prompt_password("New encryption password: ")?);
    if password.is_empty() {
        bail!("Empty password, nothing has been encrypted");
    }
    let confirmation = Zeroizing::new(rpassword::prompt_password("Repeat password: ")?);
    if *password != *confirmation {
        bail!("Passwords do not match, nothing has been encrypted");
    }

    session
        .encrypt_with(password.as_bytes())
        .with_context(|| format!("Encrypting {}", session.path().display()))?;
    println!("{} has been encrypted.", session.path().display());
    Ok(())
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let path = config::config_path().context("Locating config")?;
    tracing::debug!(path = %path.display(), "using config");
    let mut session = Session::new(path, prompt_password);

    match cli.account.as_deref() {
        _ if cli.encrypt => encrypt(&mut session),
        Some(name) if cli.bare => print_bare_code(&mut session, name),
        Some(name) if cli.add => add_account(&mut session, name),
        Some(name) if cli.remove => remove_account(&mut session, name),
        Some(name) if cli.secret => print_secret(&mut session, name),
        filter => print_codes(&mut session, filter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn codes(prev: &str, curr: &str, next: &str) -> Codes {
        Codes {
            prev: prev.to_string(),
            curr: curr.to_string(),
            next: next.to_string(),
        }
    }

    #[test]
    fn cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn cli_actions() {
        let cli = Cli::try_parse_from(["gauth", "github", "-b"]).unwrap();
        assert_eq!(cli.account.as_deref(), Some("github"));
        assert!(cli.bare);

        let cli = Cli::try_parse_from(["gauth", "--remove", "work"]).unwrap();
        assert!(cli.remove);

        assert!(Cli::try_parse_from(["gauth", "-e"]).unwrap().encrypt);
        assert!(Cli::try_parse_from(["gauth"]).unwrap().account.is_none());
    }

    #[test]
    fn cli_rejects_bad_combinations() {
        assert!(Cli::try_parse_from(["gauth", "-b"]).is_err());
        assert!(Cli::try_parse_from(["gauth", "-a"]).is_err());
        assert!(Cli::try_parse_from(["gauth", "x", "-a", "-r"]).is_err());
        assert!(Cli::try_parse_from(["gauth", "x", "-e"]).is_err());
    }

    #[test]
    fn table_layout() {
        let rows = vec![
            ("github".to_string(), codes("111111", "222222", "333333")),
            ("a".to_string(), codes("444444", "555555", "666666")),
        ];
        let mut out = Vec::new();
        write_table(&mut out, &rows).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "       prev   curr   next\n\
             github 111111 222222 333333\n\
             a      444444 555555 666666\n"
        );
    }

    #[test]
    fn table_keeps_header_width_for_short_codes() {
        let rows = vec![("x".to_string(), codes("12", "34", "56"))];
        let mut out = Vec::new();
        write_table(&mut out, &rows).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "  prev curr next\nx 12   34   56\n"
        );
    }

    #[test]
    fn progress() {
        assert_eq!(progress_bar(0), format!("[{}]", " ".repeat(29)));
        assert_eq!(progress_bar(10), format!("[{}{}]", "=".repeat(10), " ".repeat(19)));
        assert_eq!(progress_bar(29), format!("[{}]", "=".repeat(29)));
        assert_eq!(progress_bar(45), format!("[{}]", "=".repeat(29)));
    }
}
