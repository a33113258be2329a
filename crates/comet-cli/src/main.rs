#![forbid(unsafe_code)]

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use comet_engine::{BundleOptions, Minifiers, NodeModulesMode, Registry, RegistryConfig};

type CliResult = Result<(), Box<dyn Error>>;

/// Packages every app uses without declaring them.
const CORE_PACKAGES: [&str; 2] = ["runtime", "startup"];

/// Default remote origin for release manifests and package archives.
const DEFAULT_ORIGIN: &str = "https://packages.comet.dev";

/// Default bundle output directory inside an app.
const DEFAULT_OUTPUT: &str = "bundle";

#[derive(Debug, Parser)]
#[command(name = "comet", about = "The Comet application bundler")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bundle an app into a self-contained runnable directory
    Bundle {
        /// App directory (defaults to the enclosing app of the cwd)
        app_dir: Option<PathBuf>,
        /// Output directory (defaults to <app>/bundle)
        #[arg(long)]
        output: Option<PathBuf>,
        /// How to materialize node_modules: skip, symlink, or copy
        #[arg(long, default_value = "symlink")]
        node_modules: String,
        /// Skip client-asset minification
        #[arg(long)]
        no_minify: bool,
        /// Release version override
        #[arg(long)]
        release: Option<String>,
        /// Include the tests of these packages (names or directories)
        #[arg(long, num_args = 1..)]
        test_packages: Vec<String>,
        /// Remote package origin
        #[arg(long, default_value = DEFAULT_ORIGIN)]
        origin: String,
    },
    /// Create a new Comet app
    Init {
        /// App name (defaults to the directory name)
        name: Option<String>,
    },
    /// Populate the package cache for a release
    Fetch {
        /// Release version to fetch
        #[arg(long)]
        release: String,
        /// Remote package origin
        #[arg(long, default_value = DEFAULT_ORIGIN)]
        origin: String,
    },
    /// List every package known locally or pinned by a release
    Packages {
        /// Release version whose pins should be included
        #[arg(long)]
        release: Option<String>,
        /// Remote package origin
        #[arg(long, default_value = DEFAULT_ORIGIN)]
        origin: String,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Bundle {
            app_dir,
            output,
            node_modules,
            no_minify,
            release,
            test_packages,
            origin,
        } => cmd_bundle(
            app_dir,
            output,
            &node_modules,
            no_minify,
            release,
            test_packages,
            origin,
        ),
        Command::Init { name } => cmd_init(name),
        Command::Fetch { release, origin } => cmd_fetch(&release, origin),
        Command::Packages { release, origin } => cmd_packages(release, origin),
    };

    if let Err(msg) = result {
        eprintln!("error: {msg}");
        process::exit(1);
    }
}

/// Resolve `~/.comet`, the installed framework layout.
fn comet_home() -> Result<PathBuf, Box<dyn Error>> {
    let home = std::env::var("COMET_HOME")
        .map(PathBuf::from)
        .or_else(|_| {
            std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .map(|h| PathBuf::from(h).join(".comet"))
        })
        .map_err(|_| "cannot determine home directory — set COMET_HOME or HOME")?;
    Ok(home)
}

fn make_registry(origin: String) -> Result<Registry, Box<dyn Error>> {
    let home = comet_home()?;
    Ok(Registry::new(RegistryConfig {
        package_sets: vec![home.join("packages")],
        cache_dir: home.join("cache"),
        origin,
        core_packages: CORE_PACKAGES.iter().map(|s| (*s).to_owned()).collect(),
        runtime_dir: home.join("server"),
    }))
}

/// Find the enclosing app directory by walking upward from the cwd.
fn app_root() -> Result<PathBuf, Box<dyn Error>> {
    let cwd = std::env::current_dir()?;
    comet_util::fs::find_upwards(&cwd, ".comet")
        .ok_or_else(|| "not inside a Comet app — run `comet init` to create one".into())
}

fn cmd_bundle(
    app_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    node_modules: &str,
    no_minify: bool,
    release: Option<String>,
    test_packages: Vec<String>,
    origin: String,
) -> CliResult {
    let app_dir = match app_dir {
        Some(dir) => dir,
        None => app_root()?,
    };
    if !comet_config::project::is_app_dir(&app_dir) {
        return Err(format!("{} is not a Comet app directory", app_dir.display()).into());
    }
    let output = output.unwrap_or_else(|| app_dir.join(DEFAULT_OUTPUT));

    let mode: NodeModulesMode = node_modules.parse()?;
    let mut registry = make_registry(origin)?;

    let options = BundleOptions {
        node_modules_mode: mode,
        minify: if no_minify {
            None
        } else {
            Some(Minifiers::whitespace())
        },
        test_packages: if test_packages.is_empty() {
            None
        } else {
            Some(test_packages)
        },
        release_override: release,
    };

    eprintln!("    Bundling {}", app_dir.display());
    match comet_engine::bundle(&app_dir, &output, &mut registry, &options) {
        Ok(()) => {
            eprintln!("    Wrote bundle to {}", output.display());
            Ok(())
        }
        Err(errors) => {
            for error in &errors {
                eprintln!("{error}");
            }
            Err("bundling failed".into())
        }
    }
}

fn cmd_init(name: Option<String>) -> CliResult {
    let cwd = std::env::current_dir()?;

    let app_name = name.unwrap_or_else(|| {
        cwd.file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("my-app")
            .to_owned()
    });

    let app_dir = cwd.join(&app_name);
    init_app(&app_dir)?;

    eprintln!("    Created app `{app_name}` at {}", app_dir.display());
    eprintln!();
    eprintln!("  To get started:");
    eprintln!("    cd {app_name}");
    eprintln!("    comet bundle");
    Ok(())
}

/// Scaffold an app: the `.comet/` control files, a hello-world entry
/// point, a `public/` directory, and gitignore entries for bundle output.
fn init_app(app_dir: &Path) -> CliResult {
    let control = app_dir.join(".comet");
    if control.exists() {
        return Err(format!(
            "{} already exists — refusing to initialize over it",
            control.display()
        )
        .into());
    }

    comet_util::fs::ensure_dir(&control)?;
    std::fs::write(
        control.join("packages"),
        "# Packages this app uses, one per line.\n",
    )?;
    std::fs::write(
        app_dir.join("main.js"),
        "console.log(\"Hello from Comet!\");\n",
    )?;
    comet_util::fs::ensure_dir(&app_dir.join("public"))?;

    comet_util::fs::append_to_gitignore(app_dir, DEFAULT_OUTPUT)?;
    comet_util::fs::append_to_gitignore(app_dir, ".build.*")?;
    Ok(())
}

fn cmd_fetch(release: &str, origin: String) -> CliResult {
    let registry = make_registry(origin)?;
    eprintln!("    Fetching release {release}...");
    let manifest = comet_engine::populate_cache_for_release(&registry, release)?;
    eprintln!(
        "    Cached {} package(s) for release {release}",
        manifest.packages.len()
    );
    Ok(())
}

fn cmd_packages(release: Option<String>, origin: String) -> CliResult {
    let mut registry = make_registry(origin)?;
    if let Some(version) = release {
        let manifest = comet_engine::load_release_manifest(&registry, &version)?;
        registry.set_release(manifest);
    }
    for name in registry.list()? {
        println!("{name}");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn init_app_scaffolds_control_files() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("demo");

        init_app(&app).unwrap();

        assert!(comet_config::project::is_app_dir(&app));
        assert!(app.join("main.js").is_file());
        assert!(app.join("public").is_dir());
        let gitignore = std::fs::read_to_string(app.join(".gitignore")).unwrap();
        assert!(gitignore.contains("bundle"));
        assert!(gitignore.contains(".build.*"));
    }

    #[test]
    fn init_app_refuses_existing_app() {
        let tmp = tempfile::tempdir().unwrap();
        let app = tmp.path().join("demo");
        init_app(&app).unwrap();

        let err = init_app(&app).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }
}
