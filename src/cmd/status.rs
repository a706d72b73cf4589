use indicatif::ProgressBar;

use crate::cmd::{exit_with_error, open_revision_log, Cli, StatusArgs};

pub fn run(cli: &Cli, args: &StatusArgs) {
    let progress = ProgressBar::hidden();

    let revision_log = match open_revision_log(cli, &args.url, Some(&progress)) {
        Ok(revision_log) => revision_log,
        Err(err) => exit_with_error(&err),
    };

    println!("Repository: {}", revision_log.repository_url());
    println!("Project:    {}", revision_log.project_path());

    if !revision_log.ref_name().is_empty() {
        println!("Ref:        {}", revision_log.ref_name());
    }

    let watermarks = match revision_log.watermarks() {
        Ok(watermarks) => watermarks,
        Err(err) => exit_with_error(&err),
    };

    println!("Plugins:");

    for (plugin, last_revision) in watermarks {
        println!("  {:<8} last revision {}", plugin, last_revision);
    }
}
