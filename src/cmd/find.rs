use indicatif::ProgressBar;

use revlog::plugins::FindResult;

use crate::cmd::{exit_with_error, open_revision_log, Cli, FindArgs};

pub fn run(cli: &Cli, args: &FindArgs) {
    let progress = ProgressBar::hidden();

    let revision_log = match open_revision_log(cli, &args.url, Some(&progress)) {
        Ok(revision_log) => revision_log,
        Err(err) => exit_with_error(&err),
    };

    let result = match revision_log.find(&args.plugin, &args.criteria) {
        Ok(result) => result,
        Err(err) => exit_with_error(&err),
    };

    if args.json {
        let json = match &result {
            FindResult::Revisions(revisions) => serde_json::to_string(revisions),
            FindResult::Names(names) => serde_json::to_string(names),
        };

        match json {
            Ok(json) => println!("{}", json),
            Err(err) => {
                eprintln!("error: failed to encode results: {}", err);
                std::process::exit(1);
            }
        }

        return;
    }

    match result {
        FindResult::Revisions(revisions) => {
            for revision in revisions {
                println!("{}", revision);
            }
        }
        FindResult::Names(names) => {
            for name in names {
                println!("{}", name);
            }
        }
    }
}
