use std::sync::Arc;

use lanlink_peer::{BrowserEvent, PeerBrowser};
use lanlink_transport::{Discovery, MulticastDiscovery};

use crate::cmd::BrowseArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_peers, OutputFormat};

pub async fn run(args: BrowseArgs, format: OutputFormat) -> CliResult<i32> {
    let discovery: Arc<dyn Discovery> = Arc::new(MulticastDiscovery::new());
    let (browser, mut events) = PeerBrowser::new(&args.name, discovery);
    browser
        .start()
        .map_err(|err| peer_error("browse failed", err))?;

    let mut printed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(BrowserEvent::Results(results)) => {
                    print_peers(&results, format);
                    printed = printed.saturating_add(1);
                    if args.count.is_some_and(|count| printed >= count) {
                        break;
                    }
                }
                Some(BrowserEvent::Failed(err)) => {
                    browser.stop();
                    return Err(peer_error("browse failed", err));
                }
                None => break,
            },
        }
    }

    browser.stop();
    Ok(SUCCESS)
}
