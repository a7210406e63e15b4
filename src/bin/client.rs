use clap::Parser;
use quill_driver::config::{DriverOptions, PrefetchConfig};
use quill_driver::driver::{Connection, CursorHandle, ReturnCode};
use quill_driver::error::QuillDriverResult;
use quill_driver::remote::ScriptedRemote;
use quill_driver::utils::util::pretty_format_rows;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_FETCH_ROWS: usize = 10;

#[derive(Debug, Parser, PartialEq)]
#[clap(author, version, about, long_about= None)]
struct Args {
    #[clap(long, default_value_t = 100, help = "Rows produced by every query")]
    rows: usize,
    #[clap(long, default_value_t = 10, help = "Rows per remote page")]
    page_size: usize,
    #[clap(long, help = "Simulated latency of each page fetch in milliseconds")]
    latency_ms: Option<u64>,
    #[clap(long, help = "0-based page index that fails with a remote error")]
    fail_page: Option<usize>,
    #[clap(
        long,
        help = "Pages buffered ahead of the consumer",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    prefetch_capacity: Option<u64>,
    #[clap(
        long,
        help = "Cancel queries still running after this many milliseconds (0 to disable)",
        value_name = "MS"
    )]
    query_timeout_ms: Option<u64>,
}

fn main() -> QuillDriverResult<()> {
    env_logger::init();
    let args = Args::parse();

    let remote = Arc::new(ScriptedRemote::new());
    remote.set_default_script(ScriptedRemote::paged_series(
        args.rows,
        args.page_size,
        args.latency_ms.map(Duration::from_millis),
        args.fail_page,
    ));

    let mut prefetch = PrefetchConfig::default();
    if let Some(capacity) = args.prefetch_capacity {
        prefetch.capacity = capacity as usize;
    }
    let options = DriverOptions {
        prefetch,
        ..Default::default()
    }
    .with_query_timeout_ms(args.query_timeout_ms);

    let conn = Connection::connect(remote, options);
    let statement = conn.create_statement()?;

    println!(":) Connected. Commands: execute <query>, fetch [n], cancel, close, state, exit");
    let mut rl = DefaultEditor::new()?;
    rl.load_history(".history").ok();

    loop {
        let readline = rl.readline("quill-driver> ");
        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);
                if line == "exit" || line == "\\q" {
                    println!("bye!");
                    break;
                }
                run_command(&conn, &statement, line);
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }

    conn.disconnect()?;
    rl.save_history(".history").ok();
    Ok(())
}

fn run_command(conn: &Connection, statement: &CursorHandle, line: &str) {
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .map(|(cmd, rest)| (cmd, rest.trim()))
        .unwrap_or((line, ""));

    match command.to_ascii_lowercase().as_str() {
        "execute" | "exec" => {
            if rest.is_empty() {
                println!("usage: execute <query>");
                return;
            }
            report(ReturnCode::of(&statement.execute(rest)));
        }
        "fetch" => {
            let limit = if rest.is_empty() {
                DEFAULT_FETCH_ROWS
            } else {
                match rest.parse::<usize>() {
                    Ok(n) => n,
                    Err(_) => {
                        println!("usage: fetch [n]");
                        return;
                    }
                }
            };
            fetch_rows(conn, statement, limit);
        }
        "cancel" => report(ReturnCode::of(&conn.cancel(statement))),
        "close" => report(ReturnCode::of(&conn.close(statement))),
        "state" => println!("{}", statement.state()),
        other => println!("unknown command: {}", other),
    }
}

fn fetch_rows(conn: &Connection, statement: &CursorHandle, limit: usize) {
    let mut rows = Vec::new();
    let mut code = ReturnCode::Ok;
    while rows.len() < limit {
        let result = conn.fetch(statement);
        code = ReturnCode::of_fetch(&result);
        match result {
            Ok(Some(row)) => rows.push(row),
            Ok(None) | Err(_) => break,
        }
    }
    if !rows.is_empty() {
        println!("{}", pretty_format_rows(&["id", "label"], &rows));
    }
    report(code);
}

fn report(code: ReturnCode) {
    println!("{}", code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefetch_capacity_must_be_positive() {
        assert!(Args::try_parse_from(["client", "--prefetch-capacity", "0"]).is_err());
        let args = Args::try_parse_from(["client", "--prefetch-capacity", "3"]).unwrap();
        assert_eq!(args.prefetch_capacity, Some(3));
    }
}
