use indicatif::{ProgressBar, ProgressStyle};

use crate::cmd::{exit_with_error, open_revision_log, Cli, RefreshArgs};

pub fn run(cli: &Cli, args: &RefreshArgs) {
    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template(" * Reading missing revisions: {pos} window(-s) {spinner}")
            .expect("progress template"),
    );

    let mut revision_log = match open_revision_log(cli, &args.url, Some(&progress)) {
        Ok(revision_log) => revision_log,
        Err(err) => {
            progress.finish_and_clear();
            exit_with_error(&err);
        }
    };

    progress.finish_and_clear();

    if let Some(revision) = args.reparse {
        if let Err(err) = revision_log.reparse(revision, None) {
            exit_with_error(&err);
        }

        eprintln!("Revision {} re-derived.", revision);
    }

    let watermarks = match revision_log.watermarks() {
        Ok(watermarks) => watermarks,
        Err(err) => exit_with_error(&err),
    };

    let last_revision = watermarks.iter().map(|(_, revision)| *revision).min().unwrap_or(0);
    eprintln!("Revision index is at revision {}.", last_revision);

    if args.verbose {
        eprintln!("Plugin statistics:");

        for (plugin, statistics) in revision_log.statistics() {
            for (statistic, count) in statistics.counters() {
                eprintln!(" * {}.{}: {}", plugin, statistic, count);
            }
        }
    }
}
