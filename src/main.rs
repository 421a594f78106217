#![warn(clippy::all, rust_2018_idioms)]

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use std::path::PathBuf;
use vaccine_reconciler::{
    confirm_and_apply, fix_intervals, format_plan, parse_calendar_date, reconcile, AppointmentStore,
    ApplySummary, AssumeYes, Config, Confirm, IncorrectReport, RonFileStore, Summary, UpdatePlan,
    VaccineSchedule,
};

#[derive(Parser)]
#[command(name = "vaccine-reconcile", version, about = "Find and fix mis-scheduled vaccine doses")]
struct Cli {
    /// RON config file; flags below override it.
    #[arg(long, env = "VACCINE_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// RON snapshot of schedules and appointments.
    #[arg(long, env = "VACCINE_STORE", global = true)]
    store: Option<PathBuf>,

    /// JSON report of incorrect appointments.
    #[arg(long, env = "VACCINE_REPORT", global = true)]
    report: Option<PathBuf>,

    /// Limit to one patient.
    #[arg(long, global = true)]
    patient: Option<String>,

    /// Limit to one vaccine.
    #[arg(long, global = true)]
    vaccine: Option<String>,

    /// Do not ask before writing.
    #[arg(short, long, global = true)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify every appointment and write the report. Changes nothing.
    Check {
        /// Also list doses that have no appointment yet.
        #[arg(long)]
        missing: bool,
    },
    /// Apply the corrections listed in a report written by `check`.
    Apply,
    /// Check, then apply the corrections after confirmation.
    Reconcile {
        #[arg(long)]
        missing: bool,
    },
    /// Print every dose date for a vaccine given its first dose.
    Plan {
        name: String,
        first_dose: String,
        /// Offsets from the first dose, e.g. 3,7,14,28. Defaults to the stored schedule.
        #[arg(long, value_delimiter = ',')]
        intervals: Option<Vec<i64>>,
    },
    /// Convert a schedule stored as gaps between doses into offsets from the first dose.
    FixIntervals {
        name: String,
        /// The gaps currently stored, e.g. 3,4,7,14. Nothing changes unless they match.
        #[arg(long, value_delimiter = ',', required = true)]
        from: Vec<i64>,
    },
}

struct Prompt;

impl Confirm for Prompt {
    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        Ok(dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()?)
    }
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = Config::load_or_default(self.config.as_deref())?;
        if let Some(store) = &self.store {
            config.store = store.clone();
        }
        if let Some(report) = &self.report {
            config.report = report.clone();
        }
        if self.patient.is_some() {
            config.patient = self.patient.clone();
        }
        if self.vaccine.is_some() {
            config.vaccine = self.vaccine.clone();
        }
        Ok(config)
    }

    fn confirm(&self) -> Box<dyn Confirm> {
        if self.yes {
            Box::new(AssumeYes)
        } else {
            Box::new(Prompt)
        }
    }
}

fn open_store(config: &Config) -> Result<RonFileStore> {
    RonFileStore::open(&config.store)
        .with_context(|| format!("opening store {}", config.store.display()))
}

fn check(config: &Config, store: &RonFileStore, missing: bool) -> Result<IncorrectReport> {
    // One snapshot of both tables before anything is written.
    let schedules = store.read_schedules().context("reading schedules")?;
    let records = store
        .read_appointments(&config.filter())
        .context("reading appointments")?;
    let report = reconcile(&schedules, &records)?;

    let artifact = IncorrectReport::from_report(&report);
    artifact.save(&config.report)?;
    info!(
        "wrote {} incorrect appointments to {}",
        artifact.incorrect_appointments.len(),
        config.report.display()
    );
    print!(
        "{}",
        Summary {
            report: Some(&report),
            applied: None,
            show_missing: missing,
        }
    );
    Ok(artifact)
}

fn apply(config: &Config, store: &mut RonFileStore, plan: &UpdatePlan, confirm: &mut dyn Confirm) -> Result<()> {
    let Some(applied) = confirm_and_apply(store, plan, confirm, &config.apply_options())? else {
        println!("Aborted; nothing was written.");
        return Ok(());
    };
    print!(
        "{}",
        Summary {
            report: None,
            applied: Some(&applied),
            show_missing: false,
        }
    );
    fail_on_write_errors(&applied)
}

fn fail_on_write_errors(applied: &ApplySummary) -> Result<()> {
    if !applied.failures.is_empty() {
        bail!(
            "{} of {} corrections failed",
            applied.failures.len(),
            applied.attempted
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = cli.config()?;
    let mut confirm = cli.confirm();

    match &cli.command {
        Command::Check { missing } => {
            let store = open_store(&config)?;
            check(&config, &store, *missing)?;
        }
        Command::Apply => {
            let plan = IncorrectReport::load(&config.report)?.plan();
            let mut store = open_store(&config)?;
            apply(&config, &mut store, &plan, confirm.as_mut())?;
        }
        Command::Reconcile { missing } => {
            let mut store = open_store(&config)?;
            let plan = check(&config, &store, *missing)?.plan();
            apply(&config, &mut store, &plan, confirm.as_mut())?;
        }
        Command::Plan {
            name,
            first_dose,
            intervals,
        } => {
            let first = parse_calendar_date(first_dose)
                .with_context(|| format!("bad first dose date {first_dose}"))?;
            let schedule = match intervals {
                Some(intervals) => {
                    let total_doses =
                        u32::try_from(intervals.len() + 1).context("too many intervals")?;
                    VaccineSchedule::new(name, total_doses, intervals.clone())
                }
                None => open_store(&config)?
                    .read_schedules()?
                    .into_iter()
                    .find(|s| s.vaccine_type() == name)
                    .ok_or_else(|| anyhow!("no schedule for {name}"))?,
            };
            schedule.validate()?;
            print!("{}", format_plan(name, &schedule.dose_plan(first)?));
        }
        Command::FixIntervals { name, from } => {
            let mut store = open_store(&config)?;
            match fix_intervals(&mut store, name, from, confirm.as_mut())? {
                Some(intervals) => println!("{name} intervals are now {intervals:?}"),
                None => println!("{name} schedule unchanged"),
            }
        }
    }
    Ok(())
}
