//! hpc-cluster: set up, generate and deploy an HPC cluster on this host.

use clap::{CommandFactory, Parser, Subcommand};
use cluster::controller::init_profile;
use cluster::host;
use cluster::monitor::MonitorLaunch;
use cluster::{ControllerDeps, Layout, ProfileResolver, ProvisioningController};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hpc-cluster", version, about = "Provision an HPC cluster on this host")]
struct Args {
    /// Working profile to operate on.
    #[arg(short = 'p', long = "profile", env = "HPC_CLUSTER_PROFILE", global = true)]
    profile: Option<String>,

    /// Installation top directory (default: HPC_CLUSTER_HOME, then the binary's parent directory).
    #[arg(long = "top-dir", global = true)]
    top_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show status of every component.
    #[command(alias = "check")]
    Info,
    /// Set up host (run as root).
    Setup {
        /// Run only this step.
        #[arg(long)]
        step: Option<String>,
    },
    /// Run interview and generate the manifest.
    Interview,
    /// Generate the manifest from interview results.
    Generate,
    /// Build artifacts.
    Build {
        #[arg(short = 's', long = "series")]
        series: Option<String>,
        artifacts: Vec<String>,
    },
    /// Deploy the manifest.
    Deploy,
    /// Remove all cluster applications.
    Cleanup,
    /// Run status monitor in a terminal window.
    Monitor,
    /// Run info, interview and build.
    Prepare,
    /// Create a working profile from a source profile (run as the operator, not root).
    Init { src: String, dst: Option<String> },
    /// Print recorded interview results.
    ShowInterviewResults,
}

fn print_header() {
    eprintln!("╔════════════════════════════════════════════════════════════════╗");
    eprintln!("║  hpc-cluster {:<50}║", env!("CARGO_PKG_VERSION"));
    eprintln!("╚════════════════════════════════════════════════════════════════╝");
}

async fn run(args: Args) -> anyhow::Result<()> {
    let layout = Layout::discover(args.top_dir.clone())?;

    if let Command::Init { src, dst } = &args.command {
        let login = host::login_name();
        let dir = init_profile(&layout, src, dst.as_deref(), login.as_deref(), host::is_root())?;
        println!("working profile created at {}", dir.display());
        return Ok(());
    }

    let Some(name) = args.profile.as_deref() else {
        Args::command()
            .error(
                clap::error::ErrorKind::MissingRequiredArgument,
                "a profile is required (-p PROFILE or HPC_CLUSTER_PROFILE)",
            )
            .exit();
    };
    let profile = ProfileResolver::new(layout.clone()).load(name)?;
    let controller = ProvisioningController::new(layout, profile, ControllerDeps::system());

    match args.command {
        Command::Info => println!("{}", controller.info().await),
        Command::Setup { step } => {
            let report = match step.as_deref() {
                Some(step) => controller.setup_step(step).await?,
                None => controller.setup().await?,
            };
            println!("*** setup completed successfully ({}) ***", report.completed.join(", "));
        }
        Command::Interview => {
            let generated = controller.interview().await?;
            println!("{}", generated.text);
        }
        Command::Generate => {
            let generated = controller.generate()?;
            println!("{}", generated.text);
        }
        Command::Build { series, artifacts } => {
            controller.build(series.as_deref(), &artifacts).await?
        }
        Command::Deploy => controller.deploy().await?,
        Command::Cleanup => controller.cleanup().await?,
        Command::Monitor => match controller.monitor().await {
            MonitorLaunch::Launched { terminal } => {
                println!("launched monitor in {}", terminal.display())
            }
            MonitorLaunch::Skipped { reason } => eprintln!("monitor not started: {}", reason),
        },
        Command::Prepare => {
            let generated = controller.prepare().await?;
            println!("manifest ready at {}", generated.path.display());
        }
        Command::ShowInterviewResults => print!("{}", controller.show_interview_results()?),
        Command::Init { .. } => {}
    }
    Ok(())
}

fn main() {
    // Default to info level if RUST_LOG not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    print_header();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: cannot start runtime: {}", e);
            std::process::exit(1);
        }
    };

    let result = rt.block_on(run(args));
    if let Err(e) = result {
        tracing::debug!("command failed: {:?}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
