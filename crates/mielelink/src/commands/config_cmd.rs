//! Config subcommand handlers.

use secrecy::SecretString;

use mielelink_config::{Config, SecretKind};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat, SecretArg};
use crate::commands::util;
use crate::error::CliError;

const MASK: &str = "****";

/// Copy of `cfg` with every plaintext secret replaced by a mask.
fn redacted(cfg: &Config) -> Config {
    let mut cfg = cfg.clone();
    for profile in cfg.profiles.values_mut() {
        if profile.password.is_some() {
            profile.password = Some(MASK.into());
        }
        if profile.client_secret.is_some() {
            profile.client_secret = Some(MASK.into());
        }
    }
    cfg
}

fn render(cfg: &Config, format: OutputFormat) -> Result<String, CliError> {
    let out = match format {
        OutputFormat::Text => toml::to_string_pretty(cfg).map_err(|e| CliError::Config {
            message: e.to_string(),
        })?,
        OutputFormat::Json => {
            serde_json::to_string_pretty(cfg).map_err(|e| CliError::Internal(e.to_string()))?
        }
    };
    Ok(out)
}

fn secret_kind(arg: SecretArg) -> SecretKind {
    match arg {
        SecretArg::Password => SecretKind::Password,
        SecretArg::ClientSecret => SecretKind::ClientSecret,
    }
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            let path = global
                .config
                .clone()
                .unwrap_or_else(mielelink_config::config_path);
            println!("{}", path.display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = util::load_config(global)?;
            println!("{}", render(&redacted(&cfg), global.output)?);
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = util::load_config(global)?;
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured.");
            } else {
                let mut names: Vec<&String> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        ConfigCommand::Validate => {
            let cfg = util::load_config(global)?;
            let (name, profile) = util::active_profile(global, &cfg)?;
            let config =
                mielelink_config::profile_to_service_config(&profile, &name, &cfg.defaults)?;
            eprintln!(
                "✓ Profile '{name}' is valid ({} at {})",
                config.credentials.username, config.base_url
            );
            Ok(())
        }

        ConfigCommand::SetSecret { kind, profile } => {
            let profile_name = match profile {
                Some(name) => name,
                None => {
                    let cfg = util::load_config(global)?;
                    cfg.active_profile_name(global.profile.as_deref())
                }
            };
            let kind = secret_kind(kind);
            let label = match kind {
                SecretKind::Password => "Password: ",
                SecretKind::ClientSecret => "Client secret: ",
            };

            let secret = rpassword::prompt_password(label)?;
            if secret.is_empty() {
                return Err(CliError::Validation {
                    field: "secret".into(),
                    reason: "value cannot be empty".into(),
                });
            }

            mielelink_config::store_secret(&profile_name, kind, &SecretString::from(secret))?;
            eprintln!("✓ Secret stored in system keyring for profile '{profile_name}'");
            Ok(())
        }
    }
}
