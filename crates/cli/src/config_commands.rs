use {anyhow::Result, clap::Subcommand};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration (token redacted).
    Show {
        /// Print as JSON instead of TOML.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print the path of the config file in use.
    Path,
}

pub fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { json } => show(json),
        ConfigAction::Path => {
            println!("{}", gatelink_config::find_or_default_config_path().display());
            Ok(())
        },
    }
}

fn show(json: bool) -> Result<()> {
    let config = gatelink_config::discover_and_load().redacted();
    let rendered = if json {
        serde_json::to_string_pretty(&config)?
    } else {
        toml::to_string_pretty(&config)?
    };
    println!("{rendered}");
    Ok(())
}
