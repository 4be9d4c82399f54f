// SPDX-FileCopyrightText: 2026 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use outboxclient::Settings;

/// Loads the settings from `<prefix>configuration/`.
///
/// `base.yaml` is required, `local.yaml` is optional and overrides it. Environment variables
/// prefixed with `OUTBOX_` override both, e.g. `OUTBOX_BACKEND__ORIGIN`.
pub fn get_configuration(prefix: impl AsRef<Path>) -> Result<Settings, ConfigError> {
    let configuration_directory = prefix.as_ref().join("configuration");
    let builder = Config::builder()
        .add_source(File::from(configuration_directory.join("base.yaml")))
        .add_source(File::from(configuration_directory.join("local.yaml")).required(false))
        .add_source(
            Environment::with_prefix("OUTBOX")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    build(builder)
}

/// Loads the settings from a YAML document alone. The environment is not consulted.
pub fn get_configuration_from_str(yaml: &str) -> Result<Settings, ConfigError> {
    build(Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml)))
}

fn build(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Settings, ConfigError> {
    let settings: Settings = builder.build()?.try_deserialize()?;
    settings
        .validate()
        .map_err(|error| ConfigError::Message(error.to_string()))?;
    Ok(settings)
}
