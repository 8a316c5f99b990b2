#![no_main]

use libfuzzer_sys::fuzz_target;
use simulcap::{
    Bitrate, LayerHealthWatchdog, LayerSnapshot, LimitationReason, PublisherSample,
    SendParameters,
};

fuzz_target!(|data: &[u8]| {
    let mut watchdog = LayerHealthWatchdog::new();
    let mut params = SendParameters::simulcast();

    let limitation = |b: u8| {
        if b & 1 == 0 {
            LimitationReason::Bandwidth
        } else {
            LimitationReason::None
        }
    };

    for chunk in data.chunks_exact(4) {
        let sample = PublisherSample {
            bwe: (chunk[0] != 0).then(|| Bitrate::kbps(chunk[0] as u64 * 100)),
            total_send: Bitrate::kbps(chunk[1] as u64 * 50),
            layers: vec![
                LayerSnapshot::new("q", (chunk[2] >> 4) as f64, limitation(chunk[3])),
                LayerSnapshot::new("f", (chunk[2] & 0xf) as f64, limitation(chunk[3] >> 1)),
            ],
        };

        for action in watchdog.evaluate(&sample, None) {
            action.apply(&mut params);
        }
        assert_eq!(params.encodings.len(), 3);
    }
});
