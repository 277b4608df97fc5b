use yads_core::compose::{Compose, ComposeProgram};
use yads_core::config;
use yads_core::{CommandRunner, Config, DryRunRunner, Settings, SystemRunner, TemplateFetcher};

/// Everything a command needs: resolved paths, current settings and the runner.
pub struct AppContext {
    pub config: Config,
    pub settings: Settings,
    pub runner: Box<dyn CommandRunner>,
    pub dry_run: bool,
}

impl AppContext {
    /// Load configuration and pick the runner for this invocation.
    pub fn load(dry_run: bool) -> anyhow::Result<Self> {
        let config = Config::load()?;
        let settings = config.settings()?;
        let runner: Box<dyn CommandRunner> = if dry_run {
            Box::new(DryRunRunner)
        } else {
            Box::new(SystemRunner::new())
        };

        Ok(Self {
            config,
            settings,
            runner,
            dry_run,
        })
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Compose client for the generated compose file.
    ///
    /// Under `--dry-run` the plugin form is assumed instead of probing docker.
    pub fn compose(&self) -> Compose<'_> {
        let file = self.config.compose_file.clone();
        if self.dry_run {
            Compose::new(self.runner(), file, ComposeProgram::Plugin)
        } else {
            Compose::detect(self.runner(), file)
        }
    }

    /// Fetcher for `TEMPLATES_REPO`, when one is configured.
    pub fn template_fetcher(&self) -> Option<TemplateFetcher> {
        self.settings
            .get(config::TEMPLATES_REPO)
            .filter(|url| !url.is_empty())
            .map(|url| {
                TemplateFetcher::new(url.to_string(), self.config.templates_dir.clone(), None)
            })
    }

    /// Persist settings back to the config file.
    pub fn save_settings(&self) -> anyhow::Result<()> {
        self.settings.save(&self.config.config_file)?;
        Ok(())
    }
}
