use crate::config::session::{ExecMode, SessionConfig};
use crate::config::types::IsolationError;
use crate::exec::command::CommandLine;
use crate::exec::session::IsolationSession;
use crate::kernel::capabilities;
use crate::kernel::credentials::PrivilegeSession;
use crate::kernel::mount::MOUNT_PLAN;
use crate::testing::mount_invariance;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command inside a freshly mounted root, then tear it down
    Run(RunArgs),
    /// Print the mount plan applied to every root
    Plan,
    /// List the mounts currently present under a root
    Mounts {
        /// Directory to inspect
        #[arg(long)]
        root: PathBuf,
    },
    /// Show identity, privilege state and capability flags of this process
    Status,
}

#[derive(Args)]
struct RunArgs {
    /// Directory that becomes the new root
    #[arg(long)]
    root: Option<PathBuf>,
    /// JSON session configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Join the command words and run them with `<shell> -c`
    #[arg(long)]
    shell: bool,
    /// Shell used for --shell and for the default interactive session
    #[arg(long, value_name = "PATH")]
    shell_path: Option<PathBuf>,
    /// Detach busy mounts during teardown instead of reporting them
    #[arg(long)]
    lazy_unmount: bool,
    /// Write a banner to <root>/etc/motd
    #[arg(long)]
    motd: bool,
    /// Exit with the command's status (128+N for signal N)
    #[arg(long)]
    child_status: bool,
    /// Command and arguments; defaults to an interactive shell
    #[arg(last = true)]
    command: Vec<String>,
}

pub fn run() -> Result<i32> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run_session(args),
        Commands::Plan => {
            print_plan();
            Ok(0)
        }
        Commands::Mounts { root } => list_mounts(&root),
        Commands::Status => print_status(),
    }
}

fn build_config(args: &RunArgs) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("failed to load session config {}", path.display()))?,
        None => SessionConfig::default(),
    };

    if let Some(root) = &args.root {
        config.root = Some(absolute(root)?);
    }
    if args.shell {
        config.exec_mode = ExecMode::Shell;
    }
    if let Some(shell) = &args.shell_path {
        config.shell = shell.clone();
    }
    config.lazy_unmount |= args.lazy_unmount;
    config.motd |= args.motd;

    config.validate()?;
    Ok(config)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    Ok(cwd.join(path))
}

fn report_failure(err: &IsolationError) -> i32 {
    eprintln!("rootbox: {} failed: {}", err.stage(), err);
    err.exit_code()
}

fn run_session(args: RunArgs) -> Result<i32> {
    let config = build_config(&args)?;
    let root = config.root.clone().ok_or_else(|| {
        anyhow::anyhow!("no root directory given: pass --root or set \"root\" in the config")
    })?;

    let command = if args.command.is_empty() {
        CommandLine::interactive_shell(&config.shell)
    } else {
        CommandLine::from_words(args.command.clone(), config.exec_mode)
    };

    let privilege = match PrivilegeSession::new() {
        Ok(privilege) => privilege,
        Err(e) => return Ok(report_failure(&e.into())),
    };

    let mut session = IsolationSession::new(privilege, &config);
    // Only succeeds when the saved set-user-ID is already 0; otherwise
    // begin() reports the missing privilege.
    if let Err(e) = session.elevate() {
        log::debug!("Elevation unavailable: {}", e);
    }
    log::info!(
        "Session {} starting in {}: {}",
        session.audit().session_id(),
        root.display(),
        command
    );

    let outcome = session.execute(&root, &command);
    let report = session.close();

    let mut code = match &outcome {
        Ok(status) => {
            eprintln!("command {}", status);
            0
        }
        Err(e) => report_failure(e),
    };

    for line in report.messages() {
        eprintln!("rootbox: teardown: {}", line);
    }
    if !report.is_clean() {
        code = 1;
    }

    if args.child_status && code == 0 {
        if let Ok(status) = outcome {
            code = status.as_shell_code();
        }
    }

    Ok(code)
}

fn print_plan() {
    println!("{:<10} {:<10} {:<22} DATA", "TARGET", "FSTYPE", "FLAGS");
    for entry in MOUNT_PLAN.iter() {
        println!(
            "{:<10} {:<10} {:<22} {}",
            entry.target,
            entry.source_type,
            entry.flags.to_string(),
            entry.data.unwrap_or("-")
        );
    }
}

fn list_mounts(root: &Path) -> Result<i32> {
    let root = root
        .canonicalize()
        .with_context(|| format!("invalid root {}", root.display()))?;
    let mounts = mount_invariance::mounts_under(&root)
        .context("failed to read /proc/self/mountinfo")?;

    if mounts.is_empty() {
        eprintln!("No mounts under {}", root.display());
        return Ok(0);
    }
    for entry in mounts {
        println!(
            "{} {} {}",
            entry.mount_point.display(),
            entry.filesystem_type,
            entry.mount_options
        );
    }
    Ok(0)
}

fn print_status() -> Result<i32> {
    let privilege = PrivilegeSession::new()?;
    let identity = privilege.identity();

    let capability_lines: Vec<String> = capabilities::get_capability_status()
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default();

    let status = serde_json::json!({
        "uid": identity.real_uid(),
        "gid": identity.real_gid(),
        "groups": identity.supplementary_groups(),
        "privilege_state": privilege.state().to_string(),
        "no_new_privs": capabilities::check_no_new_privs().ok(),
        "dumpable": capabilities::is_dumpable().ok(),
        "bounding_set": capabilities::get_bounding_set(),
        "capabilities": capability_lines,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(0)
}
