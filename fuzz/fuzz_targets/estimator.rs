#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::{Duration, Instant};
use simulcap::{Bitrate, CongestionEstimator, ReceiverSample};

fuzz_target!(|data: &[u8]| {
    let mut estimator = CongestionEstimator::new();
    let mut now = Instant::now();

    for chunk in data.chunks_exact(5) {
        now += Duration::from_millis(chunk[0] as u64 * 20);

        let lost = i16::from_be_bytes([chunk[1], chunk[2]]) as i64;
        let kbps = u16::from_be_bytes([chunk[3], chunk[4]]) as u64;

        let out = estimator.update(ReceiverSample::new(lost, Bitrate::kbps(kbps)), "fuzz", now);

        assert!(out.current_cap_high <= Bitrate::mbps(15));
        assert!(out.current_cap_high >= Bitrate::mbps(1));
        if let Some(request) = out.outbound {
            assert!(request.loss_rate >= 0.0 && request.loss_rate <= 1.0);
        }
    }
});
