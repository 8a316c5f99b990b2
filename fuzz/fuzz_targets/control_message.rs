#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};
use simulcap::{CapArbitrator, ControlMessage};

fuzz_target!(|data: &[u8]| {
    let mut arbitrator = CapArbitrator::new("publisher");
    let mut now = Instant::now();

    // Split on newlines so one input can carry several messages.
    for (i, payload) in data.split(|b| *b == b'\n').enumerate() {
        now += Duration::from_millis(500);

        let Ok(ControlMessage::CapRequest(request)) = ControlMessage::decode(payload) else {
            continue;
        };

        let applied = arbitrator.handle_cap_request(&request, &format!("r{}", i % 4), now);
        assert!(applied.high.is_valid());
        assert!(applied.med < applied.high);
        assert!(applied.low < applied.med);

        arbitrator.tick_cleanup(now);
        while arbitrator.poll_output().is_some() {}
    }
});
