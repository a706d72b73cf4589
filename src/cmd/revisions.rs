use indicatif::ProgressBar;

use crate::cmd::{exit_with_error, open_revision_log, Cli, RevisionsArgs};

pub fn run(cli: &Cli, args: &RevisionsArgs) {
    let progress = ProgressBar::hidden();

    let revision_log = match open_revision_log(cli, &args.url, Some(&progress)) {
        Ok(revision_log) => revision_log,
        Err(err) => exit_with_error(&err),
    };

    let results = match revision_log.get_revisions_data(&args.plugin, &args.revisions) {
        Ok(results) => results,
        Err(err) => exit_with_error(&err),
    };

    match serde_json::to_string_pretty(&results) {
        Ok(json) => println!("{}", json),
        Err(err) => {
            eprintln!("error: failed to encode results: {}", err);
            std::process::exit(1);
        }
    }
}
