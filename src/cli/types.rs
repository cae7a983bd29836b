use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum CacheAction {
    /// Install the offline cache now (or check that it is current)
    Install {
        /// Activate the new version right away instead of waiting for
        /// running sessions to close
        #[clap(long, default_value = "false")]
        skip_waiting: bool,
    },

    /// Print the coordinator state and cached generations
    Status {},
}
