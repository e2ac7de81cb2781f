// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use crate::helpers::telemetry::setup_tracing;
use crate::session::Session;
use crate::{decrypt, fetch, grant, submit};
use alloy::primitives::Address;
use anyhow::{bail, Result};
use clap::{command, ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, instrument, Level};
use veil_config::{load_config, AppConfig};

#[derive(Parser, Debug)]
#[command(name = "veil")]
#[command(about = "Submit encrypted loan applications and decrypt their risk assessment", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,

    /// Indicate error levels by adding additional `-v` arguments. Eg. `veil -vvv` will give you
    /// trace level output
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        global = true
    )]
    pub verbose: u8,

    /// Silence all output. This argument cannot be used alongside `-v`
    #[arg(
        short,
        long,
        action = ArgAction::SetTrue,
        conflicts_with = "verbose",
        global = true
    )]
    quiet: bool,

    /// Set the Open Telemetry collector grpc endpoint. Eg. http://localhost:4317
    #[arg(long = "otel", global = true)]
    pub otel: Option<String>,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        if self.quiet {
            Level::ERROR
        } else {
            match self.verbose {
                0 => Level::WARN,  //
                1 => Level::INFO,  // -v
                2 => Level::DEBUG, // -vv
                _ => Level::TRACE, // -vvv
            }
        }
    }

    #[instrument(skip_all)]
    pub async fn execute(self) -> Result<()> {
        let config = match self.load_config() {
            Ok(cfg) => cfg,
            Err(e)
                if matches!(
                    e.downcast_ref::<std::io::Error>(),
                    Some(ioe) if ioe.kind() == std::io::ErrorKind::NotFound
                ) =>
            {
                bail!("Configuration file not found. Create a veil.config.yaml or pass --config.")
            }
            Err(e) => return Err(e),
        };

        setup_tracing(config.otel.as_deref(), self.log_level())?;
        info!("Config loaded from: {:?}", config.config_file());

        let session = Session::connect(&config).await?;
        match self.command {
            Commands::Submit {
                credit_score,
                income,
                debt_ratio_bps,
                lender,
            } => {
                let application = submit::application(credit_score, &income, debt_ratio_bps, lender)?;
                submit::execute(&session, &application).await?
            }
            Commands::Run {
                credit_score,
                income,
                debt_ratio_bps,
                lender,
            } => {
                let application = submit::application(credit_score, &income, debt_ratio_bps, lender)?;
                submit::run(&session, &application).await?
            }
            Commands::Fetch { subject } => fetch::execute(&session, subject).await?,
            Commands::Decrypt { borrower } => decrypt::execute(&session, borrower).await?,
            Commands::Grant { grantee } => grant::execute(&session, grantee).await?,
        }

        Ok(())
    }

    pub fn load_config(&self) -> Result<AppConfig> {
        let mut config = load_config(self.config.as_deref())?;
        if let Some(otel) = &self.otel {
            config.otel = Some(otel.clone());
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Encrypt a loan application and submit it for risk assessment
    Submit {
        /// Credit score, 16 bit
        #[arg(long = "credit-score")]
        credit_score: u16,

        /// Yearly income in ether, eg. `120` or `1.5`
        #[arg(long)]
        income: String,

        /// Debt to income ratio in basis points
        #[arg(long = "debt-ratio-bps")]
        debt_ratio_bps: u32,

        /// Lender allowed to read the results
        #[arg(long)]
        lender: Option<Address>,
    },

    /// Submit an application, then fetch and decrypt the assessment
    Run {
        #[arg(long = "credit-score")]
        credit_score: u16,

        #[arg(long)]
        income: String,

        #[arg(long = "debt-ratio-bps")]
        debt_ratio_bps: u32,

        #[arg(long)]
        lender: Option<Address>,
    },

    /// Show the encrypted result handles of an account
    Fetch {
        /// Account to read. Defaults to the configured wallet.
        #[arg(long)]
        subject: Option<Address>,
    },

    /// Decrypt a risk assessment. A lender that was granted access can read a borrower's.
    Decrypt {
        /// Borrower whose results to decrypt. Defaults to the configured wallet.
        #[arg(long)]
        borrower: Option<Address>,
    },

    /// Allow another account to decrypt your results
    Grant {
        #[arg(long)]
        grantee: Address,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submit() -> Result<()> {
        let cli = Cli::try_parse_from([
            "veil",
            "-vv",
            "submit",
            "--credit-score",
            "750",
            "--income",
            "120",
            "--debt-ratio-bps",
            "1500",
        ])?;
        assert_eq!(cli.log_level(), Level::DEBUG);
        let Commands::Submit {
            credit_score,
            lender,
            ..
        } = cli.command
        else {
            bail!("submit expected");
        };
        assert_eq!(credit_score, 750);
        assert_eq!(lender, None);
        Ok(())
    }

    #[test]
    fn test_parse_decrypt_borrower() -> Result<()> {
        let cli = Cli::try_parse_from(["veil", "decrypt"])?;
        assert!(matches!(cli.command, Commands::Decrypt { borrower: None }));

        let borrower = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
        let cli = Cli::try_parse_from(["veil", "decrypt", "--borrower", borrower])?;
        let Commands::Decrypt {
            borrower: Some(parsed),
        } = cli.command
        else {
            bail!("decrypt with a borrower expected");
        };
        assert_eq!(parsed, borrower.parse::<Address>()?);
        assert!(Cli::try_parse_from(["veil", "decrypt", "--borrower", "nope"]).is_err());
        Ok(())
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["veil", "-q", "-v", "decrypt"]).is_err());
        assert!(Cli::try_parse_from(["veil", "submit", "--credit-score", "70000"]).is_err());
    }
}
