use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simulcap::{
    Bitrate, BitrateCapRequest, CapArbitrator, CapError, CapReason, Layer, LayerCaps,
    PublishedStream, ReceiverSample, SubscribedStream,
};

mod common;
use common::{init_log, FakeChannel, FakeSender};

struct Call {
    publisher: PublishedStream<FakeSender, FakeChannel>,
    receivers: Vec<(String, SubscribedStream<FakeChannel>)>,
}

impl Call {
    fn new(receivers: &[&str]) -> Self {
        Call {
            publisher: PublishedStream::new("publisher-1", FakeSender::simulcast(), FakeChannel::new()),
            receivers: receivers
                .iter()
                .map(|id| {
                    let s = SubscribedStream::new(*id, "publisher-1", FakeChannel::new());
                    (id.to_string(), s)
                })
                .collect(),
        }
    }

    fn tick(&mut self, now: Instant, samples: &[ReceiverSample]) -> Result<(), CapError> {
        for ((_, r), sample) in self.receivers.iter_mut().zip(samples) {
            r.handle_timeout(now, *sample);
        }
        self.publisher.handle_timeout(now, None);
        self.deliver(now)
    }

    fn deliver(&mut self, now: Instant) -> Result<(), CapError> {
        let mut upstream = vec![];
        for (id, r) in &mut self.receivers {
            for (_, message) in r.channel_mut().take() {
                upstream.push((id.clone(), message.encode()?));
            }
        }
        for (from, payload) in upstream {
            self.publisher.handle_message(&payload, &from, now)?;
        }

        for (to, message) in self.publisher.channel_mut().take() {
            let payload = message.encode()?;
            if let Some((_, r)) = self.receivers.iter_mut().find(|(id, _)| *id == to) {
                r.handle_message(&payload, "publisher-1")?;
            }
        }
        Ok(())
    }

    fn high(&self) -> Option<Bitrate> {
        self.publisher
            .sender()
            .params
            .encoding(Layer::High)
            .unwrap()
            .max_bitrate
    }
}

#[test]
pub fn congested_receiver_caps_publisher() -> Result<(), CapError> {
    init_log();

    let mut call = Call::new(&["receiver-1", "receiver-2"]);
    let t0 = Instant::now();

    let lossy = ReceiverSample::new(40, Bitrate::kbps(3_000));
    let clean = ReceiverSample::new(0, Bitrate::kbps(3_000));

    // Two ticks of loss for receiver-1, receiver-2 is fine.
    call.tick(t0, &[lossy, clean])?;
    assert_eq!(call.high(), Some(Bitrate::kbps(1_500)));
    call.tick(t0 + Duration::from_secs(2), &[lossy, clean])?;
    assert_eq!(call.high(), Some(Bitrate::kbps(1_500)));

    // Acked, so receiver-1 keeps relying on the publisher.
    for i in 2..8 {
        call.tick(t0 + Duration::from_secs(i * 2), &[lossy, clean])?;
    }
    let out = call.receivers[0].1.handle_timeout(t0 + Duration::from_secs(16), lossy);
    assert!(!out.fallback_to_layers);

    // Recovery: the first clean tick restores.
    let t1 = t0 + Duration::from_secs(18);
    call.tick(t1, &[clean, clean])?;
    assert!(!call.receivers[0].1.estimator().is_capped());

    // The restore request leaves receiver-1 at the ceilings.
    assert_eq!(call.high(), Some(Bitrate::mbps(15)));

    // No further requests while clean.
    let out = call.receivers[0].1.handle_timeout(t1 + Duration::from_secs(2), clean);
    assert!(out.outbound.is_none());

    // Its entry expires and the arbitrator goes back to uncapped.
    call.tick(t1 + Duration::from_secs(30), &[clean, clean])?;
    assert_eq!(call.publisher.arbitrator().applied_cap(), None);
    assert_eq!(call.high(), Some(Bitrate::mbps(15)));

    Ok(())
}

#[test]
pub fn arbitration_is_element_wise_minimum() {
    init_log();

    let mut rng = StdRng::seed_from_u64(42);
    let now = Instant::now();

    for _ in 0..50 {
        let mut arbitrator = CapArbitrator::new("publisher-1");
        let count = rng.random_range(1..8);
        let mut expected = LayerCaps::DEFAULT;

        for i in 0..count {
            let raw = LayerCaps::new(
                Bitrate::new(rng.random_range(0..20_000_000)),
                Bitrate::new(rng.random_range(0..6_000_000)),
                Bitrate::new(rng.random_range(0..2_000_000)),
            );
            let request = BitrateCapRequest::new(raw, CapReason::Congestion, 0.01, "");
            let caps = request.caps(&LayerCaps::DEFAULT);

            let before = arbitrator.effective_cap();
            let applied = arbitrator.handle_cap_request(&request, &format!("r{}", i), now);
            expected = expected.min(caps);

            assert_eq!(applied, expected);
            assert!(applied.high <= before.high);
            assert!(applied.med <= before.med);
            assert!(applied.low <= before.low);
        }
    }
}
