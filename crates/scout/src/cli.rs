use anyhow::Result;

use common::config::Config;
use common::db::Database;
use common::types::ListStatus;

use crate::export;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Holders,
    Early,
    EvmRecent,
    EvmEarly,
}

impl ScanMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "holders" => Some(Self::Holders),
            "early" => Some(Self::Early),
            "evm-recent" => Some(Self::EvmRecent),
            "evm-early" => Some(Self::EvmEarly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreSet {
    White,
    Watch,
}

impl ScoreSet {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "white" => Some(Self::White),
            "watch" => Some(Self::Watch),
            _ => None,
        }
    }

    pub fn status(self) -> ListStatus {
        match self {
            Self::White => ListStatus::White,
            Self::Watch => ListStatus::Watch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    ImportToken { token: String },
    Scan { token: String, mode: ScanMode, top_n: Option<usize> },
    SoftFilter { limit: Option<usize> },
    HardVerify { limit: Option<usize> },
    T0 { token: String },
    Rounds { token: String, addr: Option<String>, limit: usize },
    Score { token: String, set: ScoreSet, limit: usize },
    Select { token: String, top_k: Option<usize> },
    ExportList { status: ListStatus },
    View { limit: usize },
    ResetToken { token: String },
}

const USAGE: &str = "usage: scout <command> [args]
  import-token <token>
  scan <token> [--mode holders|early|evm-recent|evm-early] [--top N]
  soft-filter [--limit N]
  hard-verify [--limit N]
  t0 <token>
  rounds <token> [--addr ADDR] [--limit N]
  score <token> [--set white|watch] [--limit N]
  select <token> [--top K]
  export-list <WHITE|WATCH|BLACK>
  view [--limit N]
  reset-token <token>";

fn flag_value(rest: &[String], name: &str) -> Option<String> {
    rest.iter()
        .position(|a| a == name)
        .and_then(|i| rest.get(i + 1))
        .cloned()
}

fn flag_usize(rest: &[String], name: &str) -> std::result::Result<Option<usize>, String> {
    match flag_value(rest, name) {
        None => Ok(None),
        Some(v) => v
            .parse()
            .map(Some)
            .map_err(|_| format!("{name} expects a number, got {v}")),
    }
}

fn positional(rest: &[String]) -> std::result::Result<String, String> {
    match rest.first() {
        Some(v) if !v.starts_with("--") => Ok(v.clone()),
        _ => Err(USAGE.to_string()),
    }
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Err(USAGE.to_string());
    };
    let rest: Vec<String> = args.collect();

    match cmd.as_str() {
        "import-token" => Ok(Command::ImportToken {
            token: positional(&rest)?,
        }),
        "scan" => {
            let token = positional(&rest)?;
            let mode = match flag_value(&rest, "--mode") {
                None => ScanMode::Early,
                Some(m) => ScanMode::parse(&m).ok_or_else(|| format!("unknown scan mode: {m}"))?,
            };
            Ok(Command::Scan {
                token,
                mode,
                top_n: flag_usize(&rest, "--top")?,
            })
        }
        "soft-filter" => Ok(Command::SoftFilter {
            limit: flag_usize(&rest, "--limit")?,
        }),
        "hard-verify" => Ok(Command::HardVerify {
            limit: flag_usize(&rest, "--limit")?,
        }),
        "t0" => Ok(Command::T0 {
            token: positional(&rest)?,
        }),
        "rounds" => Ok(Command::Rounds {
            token: positional(&rest)?,
            addr: flag_value(&rest, "--addr"),
            limit: flag_usize(&rest, "--limit")?.unwrap_or(50),
        }),
        "score" => {
            let token = positional(&rest)?;
            let set = match flag_value(&rest, "--set") {
                None => ScoreSet::White,
                Some(s) => ScoreSet::parse(&s).ok_or_else(|| format!("unknown score set: {s}"))?,
            };
            Ok(Command::Score {
                token,
                set,
                limit: flag_usize(&rest, "--limit")?.unwrap_or(500),
            })
        }
        "select" => Ok(Command::Select {
            token: positional(&rest)?,
            top_k: flag_usize(&rest, "--top")?,
        }),
        "export-list" => {
            let kind = positional(&rest)?;
            let status =
                ListStatus::parse(&kind).ok_or_else(|| format!("unknown status: {kind}"))?;
            Ok(Command::ExportList { status })
        }
        "view" => Ok(Command::View {
            limit: flag_usize(&rest, "--limit")?.unwrap_or(200),
        }),
        "reset-token" => Ok(Command::ResetToken {
            token: positional(&rest)?,
        }),
        other => Err(format!("unknown command: {other}\n{USAGE}")),
    }
}

/// Run store-only commands that need no network. Returns `false` when the
/// command is network-bound and still pending.
pub fn run_local(db: &Database, config: &Config, cmd: &Command) -> Result<bool> {
    match cmd {
        Command::ImportToken { token } => {
            db.upsert_token(&config.ledger.chain, token, None, None, "manual")?;
            println!("imported {token}");
            Ok(true)
        }
        Command::View { limit } => {
            println!("first_seen\tchain\ttoken\taddr\tstatus\treason");
            for row in db.view_rows(*limit)? {
                println!(
                    "{}\t{}\t{}…\t{}\t{}\t{}",
                    row.first_seen,
                    row.chain,
                    row.token_address.get(..10).unwrap_or(&row.token_address),
                    row.addr,
                    row.status,
                    row.reason
                );
            }
            for (status, count) in db.status_counts()? {
                println!("{status}: {count}");
            }
            Ok(true)
        }
        Command::ExportList { status } => {
            let addrs = db.fetch_by_status(*status, None)?;
            let path = export::export_status_txt(
                std::path::Path::new(&config.export.dir),
                status.as_str(),
                &addrs,
            )?;
            println!("{} addresses -> {}", addrs.len(), path.display());
            Ok(true)
        }
        Command::ResetToken { token } => {
            db.reset_token(&config.ledger.chain, token)?;
            println!("reset {token}");
            Ok(true)
        }
        _ => Ok(false),
    }
}
