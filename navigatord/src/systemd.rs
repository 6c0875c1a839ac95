use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use tokio::process::Command;
use crate::config::{Config, DEFAULT_CONFIG_PATH, DEFAULT_DATA_DIR};

const DEFAULT_INSTALL_PATH: &str = "/usr/local/bin/navigatord";
const DEFAULT_UNIT_PATH: &str = "/etc/systemd/system/home-server-navigator.service";

#[derive(Debug, Clone, Subcommand)]
pub enum SystemdCommand {
    /// Install the binary, config and unit, then enable and start the unit
    Install(InstallArgs),
    /// Remove the unit (config, binary and data are kept unless asked)
    Uninstall(UninstallArgs),
}

#[derive(Debug, Clone, Args)]
pub struct InstallArgs {
    #[arg(long, default_value = DEFAULT_INSTALL_PATH)]
    pub install_path: PathBuf,
    #[arg(long, default_value = DEFAULT_UNIT_PATH)]
    pub unit_path: PathBuf,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,
    /// Holds the service database
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub listen: String,
    /// Host used in links for services that do not name one
    #[arg(long, default_value = "localhost")]
    pub default_host: String,
    /// Overwrite an existing config file
    #[arg(long)]
    pub force_config: bool,
    /// Do not enable or start the unit
    #[arg(long)]
    pub no_enable: bool,
}

#[derive(Debug, Clone, Args)]
pub struct UninstallArgs {
    #[arg(long, default_value = DEFAULT_UNIT_PATH)]
    pub unit_path: PathBuf,
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config_path: PathBuf,
    #[arg(long, default_value = DEFAULT_INSTALL_PATH)]
    pub install_path: PathBuf,
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,
    #[arg(long)]
    pub remove_binary: bool,
    #[arg(long)]
    pub remove_config: bool,
    /// Delete the data directory and the service database in it
    #[arg(long)]
    pub remove_data: bool,
}

pub async fn handle(command: SystemdCommand) -> Result<()> {
    if !cfg!(target_os = "linux") {
        bail!("systemd install is only supported on Linux");
    }

    match command {
        SystemdCommand::Install(args) => install(&args).await,
        SystemdCommand::Uninstall(args) => uninstall(&args).await,
    }
}

async fn install(args: &InstallArgs) -> Result<()> {
    let unit_name = unit_name(&args.unit_path)?;

    install_binary(&args.install_path)?;
    stage_files(args)?;
    systemctl(&["daemon-reload"]).await?;

    if args.no_enable {
        tracing::info!("Installed {}; start it with: systemctl enable --now {}", unit_name, unit_name);
    } else {
        systemctl(&["enable", "--now", unit_name.as_str()]).await?;
        tracing::info!("Installed and started {}", unit_name);
    }
    Ok(())
}

async fn uninstall(args: &UninstallArgs) -> Result<()> {
    let unit_name = unit_name(&args.unit_path)?;

    if let Err(e) = systemctl(&["disable", "--now", unit_name.as_str()]).await {
        tracing::warn!("Could not disable {}: {:#}", unit_name, e);
    }
    remove_file_if_exists(&args.unit_path)?;
    systemctl(&["daemon-reload"]).await?;

    remove_installed_files(args)?;
    tracing::info!("Uninstalled {}", unit_name);
    Ok(())
}

/// Write the data directory, config and unit file. An existing config is kept
/// unless `force_config` is set.
pub fn stage_files(args: &InstallArgs) -> Result<()> {
    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("Failed to create directory: {}", args.data_dir.display()))?;

    if args.force_config || !args.config_path.exists() {
        write_file(&args.config_path, &render_config(args)?)?;
    } else {
        tracing::info!("Keeping existing config {}", args.config_path.display());
    }

    write_file(
        &args.unit_path,
        &render_unit(&args.install_path, &args.config_path),
    )
}

fn remove_installed_files(args: &UninstallArgs) -> Result<()> {
    if args.remove_config {
        remove_file_if_exists(&args.config_path)?;
    }
    if args.remove_binary {
        remove_file_if_exists(&args.install_path)?;
    }
    if args.remove_data && args.data_dir.exists() {
        std::fs::remove_dir_all(&args.data_dir)
            .with_context(|| format!("Failed to remove {}", args.data_dir.display()))?;
    }
    Ok(())
}

pub fn render_config(args: &InstallArgs) -> Result<String> {
    let mut config = Config::default();
    config.navigator.default_host = args.default_host.clone();
    config.api.listen = args.listen.clone();
    config.store.db_path = args.data_dir.join("services.db");

    toml::to_string_pretty(&config).context("Failed to render config")
}

pub fn render_unit(install_path: &Path, config_path: &Path) -> String {
    format!(
        "[Unit]
Description=Home Server Navigator
After=network-online.target
Wants=network-online.target

[Service]
Type=simple
ExecStart={} --config {}
Restart=on-failure
RestartSec=2
NoNewPrivileges=true
PrivateTmp=true
ProtectSystem=full
ProtectHome=true

[Install]
WantedBy=multi-user.target
",
        install_path.display(),
        config_path.display()
    )
}

fn unit_name(unit_path: &Path) -> Result<String> {
    unit_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("Invalid unit path: {}", unit_path.display()))
}

fn install_binary(install_path: &Path) -> Result<()> {
    let exe = std::env::current_exe().context("Failed to locate current executable")?;
    if exe == install_path {
        return Ok(());
    }

    if let Some(parent) = install_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::copy(&exe, install_path).with_context(|| {
        format!("Failed to copy {} to {}", exe.display(), install_path.display())
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(install_path, std::fs::Permissions::from_mode(0o755))
            .with_context(|| format!("Failed to make {} executable", install_path.display()))?;
    }
    Ok(())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("Failed to write {}", path.display()))
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}

async fn systemctl(args: &[&str]) -> Result<()> {
    let output = Command::new("systemctl")
        .args(args)
        .output()
        .await
        .context("Failed to spawn systemctl")?;

    if !output.status.success() {
        bail!(
            "systemctl {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
