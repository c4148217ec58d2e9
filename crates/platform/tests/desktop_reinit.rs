//! Desktop platform lifecycle on the main thread.
//!
//! Skips when no display is reachable.

use bridge_core::Error;
use bridge_platform::DesktopPlatform;

fn main() {
    let first = match DesktopPlatform::new() {
        Ok(platform) => platform,
        Err(Error::DisplayUnavailable(reason)) => {
            eprintln!("skipping desktop lifecycle checks: {reason}");
            return;
        }
        Err(e) => panic!("unexpected platform error: {e}"),
    };

    // A second live platform cannot share the loop, but that is not a missing display.
    match DesktopPlatform::new() {
        Err(Error::Internal(_)) => {}
        Err(e) => panic!("second live platform reported {e:?}"),
        Ok(_) => panic!("two live platforms shared one event loop"),
    }

    drop(first);
    for round in 0..3 {
        let platform = DesktopPlatform::new();
        assert!(
            platform.is_ok(),
            "platform after teardown {round} failed: {:?}",
            platform.err()
        );
    }
    println!("desktop lifecycle: ok");
}
