use cbsdk_rs::trial::{Trackable, TrackableKind, TrackCoords};
use cbsdk_rs::{
    Collaborators, CommentPacket, CommentTag, Instrument, LogPacket, Modality, OutboundCommand,
    Packet, Payload, Result, Samples, SdkConfig, SdkError, StaticInstrumentInfo, Timestamps,
    Transport, TrialConfig, TrialData, TrialRequest, TrialState, VideoSynch, VideoTrack, Watch,
};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

struct NullTransport;

impl Transport for NullTransport {
    fn send(&self, _command: &OutboundCommand) -> Result<()> {
        Ok(())
    }
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Instance with sample group 1 carrying channels 1..=3 at 1 kHz and a
/// 2D marker trackable at id 1
fn open_instrument() -> Instrument {
    init_logging();
    let info = StaticInstrumentInfo::new("4.1")
        .with_group(1, 30, vec![1, 2, 3])
        .with_trackable(
            1,
            Trackable {
                name: "hand".to_string(),
                kind: TrackableKind::Markers2d,
                max_points: 4,
            },
        );
    Instrument::open(
        0,
        Collaborators::new(Arc::new(info), Arc::new(NullTransport)),
        SdkConfig::default(),
    )
    .expect("Failed to open instrument")
}

fn events_only(capacity: usize) -> TrialConfig {
    TrialConfig {
        active: true,
        events: capacity,
        ..TrialConfig::default()
    }
}

fn ticks(timestamps: &Timestamps) -> Vec<u64> {
    timestamps.ticks().expect("Expected tick timestamps").to_vec()
}

/// Snapshot the requested modalities and drain everything pending
fn read_all(instrument: &Instrument, request: TrialRequest, advance: bool) -> TrialData {
    let trial = instrument.trial();
    let init = trial.init(&request).expect("Trial init failed");
    let mut data = TrialData::from_init(&init);
    trial.get(&mut data, advance).expect("Trial get failed");
    data
}

#[test]
fn test_full_buffer_drops_newest() {
    let instrument = open_instrument();
    instrument.trial().set_config(&events_only(4)).unwrap();
    let mut router = instrument.router();

    for time in 1..=5 {
        router.route(&Packet::spike(time, 7, 1));
    }

    let trial = instrument.trial();
    let init = trial.init(&TrialRequest::only(Modality::Event)).unwrap();
    let channels = init.events.as_ref().unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].channel, 7);
    assert_eq!(channels[0].pending(), 4);

    let mut data = TrialData::from_init(&init);
    trial.get(&mut data, true).unwrap();
    let events = data.events.as_ref().unwrap();
    assert_eq!(ticks(&events.channels[0].timestamps[1]), vec![1, 2, 3, 4]);

    let metrics = trial.metrics(Modality::Event).unwrap();
    assert_eq!(metrics.total_dropped, 1);
    assert_eq!(metrics.overflowed, vec![(7, 1)]);

    router.route(&Packet::spike(6, 7, 1));
    let data = read_all(&instrument, TrialRequest::only(Modality::Event), true);
    let events = data.events.unwrap();
    assert_eq!(ticks(&events.channels[0].timestamps[1]), vec![6]);
}

#[test]
fn test_watches_gate_caching() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: false,
        begin: Watch::new(10, 0xffff, 1),
        end: Watch::new(10, 0xffff, 0),
        events: 16,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();
    assert_eq!(instrument.trial().state(), TrialState::Armed);

    let mut router = instrument.router();
    router.route(&Packet::spike(100, 10, 0));
    assert_eq!(instrument.trial().state(), TrialState::Armed);

    router.route(&Packet::spike(200, 10, 1));
    assert_eq!(instrument.trial().state(), TrialState::Open);

    router.route(&Packet::spike(300, 5, 2));
    router.route(&Packet::spike(400, 10, 0));
    assert_eq!(instrument.trial().state(), TrialState::Armed);
    router.route(&Packet::spike(500, 5, 2));

    let data = read_all(&instrument, TrialRequest::only(Modality::Event), true);
    let events = data.events.unwrap();
    let ch5 = events.channels.iter().find(|c| c.channel == 5).unwrap();
    let ch10 = events.channels.iter().find(|c| c.channel == 10).unwrap();

    // Trial-relative to the start at 200
    assert_eq!(ticks(&ch5.timestamps[2]), vec![100]);
    assert_eq!(ch10.total(), 2);
    assert_eq!(ticks(&ch10.timestamps[1]), vec![0]);
    assert_eq!(ticks(&ch10.timestamps[0]), vec![200]);
}

#[test]
fn test_inactive_trial_caches_nothing() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: false,
        ..events_only(16)
    };
    instrument.trial().set_config(&config).unwrap();
    assert_eq!(instrument.trial().state(), TrialState::Idle);

    let mut router = instrument.router();
    router.route(&Packet::spike(10, 3, 1));

    let init = instrument
        .trial()
        .init(&TrialRequest::only(Modality::Event))
        .unwrap();
    assert!(init.events.unwrap().is_empty());
}

#[test]
fn test_peek_without_advance_is_repeatable() {
    let instrument = open_instrument();
    instrument.trial().set_config(&events_only(16)).unwrap();
    let mut router = instrument.router();
    router.route(&Packet::spike(11, 4, 0));
    router.route(&Packet::spike(12, 4, 3));

    let first = read_all(&instrument, TrialRequest::only(Modality::Event), false);
    let second = read_all(&instrument, TrialRequest::only(Modality::Event), false);
    assert_eq!(first, second);

    let consumed = read_all(&instrument, TrialRequest::only(Modality::Event), true);
    assert_eq!(first, consumed);

    let init = instrument
        .trial()
        .init(&TrialRequest::only(Modality::Event))
        .unwrap();
    assert!(init.events.unwrap().is_empty());
}

#[test]
fn test_partial_read_leaves_remainder() {
    let instrument = open_instrument();
    instrument.trial().set_config(&events_only(16)).unwrap();
    let mut router = instrument.router();
    for time in 1..=5 {
        router.route(&Packet::spike(time, 2, 1));
    }

    let trial = instrument.trial();
    trial.init(&TrialRequest::only(Modality::Event)).unwrap();
    let mut data = TrialData {
        events: Some(cbsdk_rs::trial::EventTrial {
            channels: vec![cbsdk_rs::trial::EventChannel::new(2, [0, 2, 0, 0, 0, 0])],
        }),
        ..TrialData::default()
    };
    trial.get(&mut data, true).unwrap();
    assert_eq!(
        ticks(&data.events.as_ref().unwrap().channels[0].timestamps[1]),
        vec![1, 2]
    );

    let rest = read_all(&instrument, TrialRequest::only(Modality::Event), true);
    assert_eq!(
        ticks(&rest.events.unwrap().channels[0].timestamps[1]),
        vec![3, 4, 5]
    );
}

#[test]
fn test_digital_values_and_masking() {
    let instrument = open_instrument();
    instrument.trial().set_config(&events_only(16)).unwrap();
    instrument.set_channel_mask(6, false).unwrap();

    let mut router = instrument.router();
    router.route(&Packet::new(20, 279, Payload::Digital { value: 0x1_00ab }));
    router.route(&Packet::new(21, 280, Payload::Serial { value: 0x41 }));
    router.route(&Packet::spike(22, 6, 1));
    // Digital data on an electrode channel is dropped
    router.route(&Packet::new(23, 8, Payload::Digital { value: 1 }));

    let data = read_all(&instrument, TrialRequest::only(Modality::Event), true);
    let events = data.events.unwrap();
    let channels: Vec<u16> = events.channels.iter().map(|c| c.channel).collect();
    assert_eq!(channels, vec![279, 280]);
    assert_eq!(events.channels[0].values, vec![0x00ab]);
    assert_eq!(ticks(&events.channels[0].timestamps[0]), vec![20]);
    assert_eq!(events.channels[1].values, vec![0x41]);
}

#[test]
fn test_continuous_groups() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: true,
        continuous: 8,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();
    instrument.set_channel_mask(2, false).unwrap();

    let mut router = instrument.router();
    router.route(&Packet::group(100, 1, vec![10, 20, 30]));
    router.route(&Packet::group(101, 1, vec![11, 21, 31]));
    // Unknown group and uncached group 6 are ignored
    router.route(&Packet::group(102, 2, vec![99]));
    router.route(&Packet::group(103, 6, vec![99]));

    let data = read_all(&instrument, TrialRequest::only(Modality::Continuous), true);
    let continuous = data.continuous.unwrap();
    assert_eq!(continuous.start_time, 0);
    let channels: Vec<u16> = continuous.channels.iter().map(|c| c.channel).collect();
    assert_eq!(channels, vec![1, 3]);
    assert_eq!(continuous.channels[0].sample_rate, 1000);
    assert_eq!(continuous.channels[0].samples.raw(), Some(&[10, 11][..]));
    assert_eq!(continuous.channels[1].samples.raw(), Some(&[30, 31][..]));
}

#[test]
fn test_double_output() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: true,
        double: true,
        absolute: true,
        continuous: 8,
        events: 8,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();

    let mut router = instrument.router();
    router.route(&Packet::group(30_000, 1, vec![5, 6, 7]));
    router.route(&Packet::spike(60_000, 1, 1));

    let request = TrialRequest {
        continuous: true,
        events: true,
        ..TrialRequest::default()
    };
    let data = read_all(&instrument, request, true);
    let continuous = data.continuous.unwrap();
    assert_eq!(continuous.channels[0].samples, Samples::Double(vec![5.0]));

    let events = data.events.unwrap();
    assert_eq!(
        events.channels[0].timestamps[1].seconds(),
        Some(&[2.0][..])
    );
}

#[test]
fn test_reset_rebases_timestamps() {
    let instrument = open_instrument();
    instrument.trial().set_config(&events_only(16)).unwrap();
    let mut router = instrument.router();
    router.route(&Packet::spike(1_000, 3, 1));

    let trial = instrument.trial();
    let request = TrialRequest::only(Modality::Event).with_reset(true);
    trial.init(&request).unwrap();

    router.route(&Packet::spike(1_500, 3, 1));
    let data = read_all(&instrument, request, true);
    assert_eq!(
        ticks(&data.events.unwrap().channels[0].timestamps[1]),
        vec![0, 500]
    );
}

#[test]
fn test_comments_and_log_entries() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: true,
        comments: 8,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();

    let mut router = instrument.router();
    router.route(&Packet::config(
        10,
        Payload::Comment(CommentPacket {
            charset: 0,
            tag: CommentTag::Rgba(0x00ff_0000),
            text: "stimulus on".to_string(),
        }),
    ));
    router.route(&Packet::config(
        20,
        Payload::Comment(CommentPacket {
            charset: 1,
            tag: CommentTag::Started(15),
            text: "x".repeat(300),
        }),
    ));
    router.route(&Packet::config(
        30,
        Payload::Log(LogPacket {
            mode: 0,
            name: "app".to_string(),
            text: "saved".to_string(),
        }),
    ));

    let data = read_all(&instrument, TrialRequest::only(Modality::Comment), true);
    let comments = data.comments.unwrap();
    assert_eq!(comments.len(), 3);
    assert_eq!(ticks(&comments.timestamps), vec![10, 15, 30]);
    assert_eq!(comments.rgbas, vec![0x00ff_0000, 0, 0xffff_ffff]);
    assert_eq!(comments.charsets, vec![0, 1, 0]);
    assert_eq!(comments.texts[0], "stimulus on");
    assert_eq!(comments.texts[1].len(), 128);
    assert_eq!(comments.texts[2], "app:saved");
}

#[test]
fn test_comment_wait() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: true,
        comments: 8,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();
    let mut router = instrument.router();
    router.route(&Packet::new(100, 0, Payload::SysHeartbeat));

    let request = TrialRequest::only(Modality::Comment)
        .with_reset(true)
        .with_wait(Duration::from_millis(50));
    let init = instrument.trial().init(&request).unwrap();
    assert!(init.comments.unwrap().timed_out);

    let request = request.with_wait(Duration::from_secs(5));
    let started = Instant::now();
    let init = thread::scope(|scope| {
        scope.spawn(move || {
            thread::sleep(Duration::from_millis(30));
            router.route(&Packet::config(
                150,
                Payload::Comment(CommentPacket {
                    charset: 0,
                    tag: CommentTag::Rgba(0),
                    text: "late".to_string(),
                }),
            ));
        });
        instrument.trial().init(&request).unwrap()
    });
    let comments = init.comments.unwrap();
    assert!(!comments.timed_out);
    assert_eq!(comments.pending, 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn test_tracking() {
    let instrument = open_instrument();
    let config = TrialConfig {
        active: true,
        tracking: 8,
        ..TrialConfig::default()
    };
    instrument.trial().set_config(&config).unwrap();

    let track = |time, coords: Vec<u16>| {
        Packet::config(
            time,
            Payload::VideoTrack(VideoTrack {
                node_id: 0,
                node_count: 1,
                point_count: 2,
                coords,
            }),
        )
    };

    let mut router = instrument.router();
    // Without a preceding synch packet there is nothing to attach
    router.route(&track(5, vec![9, 9, 9, 9]));
    router.route(&Packet::config(
        6,
        Payload::VideoSynch(VideoSynch {
            split: 0,
            frame: 42,
            etime: 1_200,
            id: 1,
        }),
    ));
    router.route(&track(7, vec![1, 2, 3, 4]));

    let trial = instrument.trial();
    let init = trial
        .init(&TrialRequest::only(Modality::Tracking).with_wait(Duration::ZERO))
        .unwrap();
    let tracking_init = init.tracking.as_ref().unwrap();
    assert_eq!(tracking_init.trackables.len(), 1);
    assert_eq!(tracking_init.trackables[0].id, 1);
    assert_eq!(tracking_init.trackables[0].name, "hand");
    assert_eq!(tracking_init.trackables[0].pending, 1);

    let mut data = TrialData::from_init(&init);
    trial.get(&mut data, true).unwrap();
    let hand = &data.tracking.unwrap().trackables[0];
    assert_eq!(hand.kind, Some(TrackableKind::Markers2d));
    assert_eq!(ticks(&hand.timestamps), vec![7]);
    assert_eq!(hand.synch_frames, vec![42]);
    assert_eq!(hand.synch_timestamps, vec![1_200]);
    assert_eq!(hand.coords, vec![TrackCoords::Narrow(vec![1, 2, 3, 4])]);
}

#[test]
fn test_config_errors() {
    let instrument = open_instrument();
    let trial = instrument.trial();

    assert!(matches!(
        trial.init(&TrialRequest::only(Modality::Event)),
        Err(SdkError::ErrConfig(Modality::Event))
    ));
    assert!(matches!(
        trial.unset_config(Modality::Comment),
        Err(SdkError::ErrConfig(Modality::Comment))
    ));

    trial.set_config(&events_only(16)).unwrap();
    let config = trial.config().unwrap();
    assert!(config.active);
    assert_eq!(config.events, 16);
    assert_eq!(config.continuous, 0);

    let mut data = TrialData {
        events: Some(cbsdk_rs::trial::EventTrial {
            channels: vec![cbsdk_rs::trial::EventChannel::new(281, [1; 6])],
        }),
        ..TrialData::default()
    };
    assert!(matches!(
        trial.get(&mut data, true),
        Err(SdkError::InvalidChannel(281))
    ));

    trial.unset_config(Modality::Event).unwrap();
    assert!(matches!(
        trial.metrics(Modality::Event),
        Err(SdkError::ErrConfig(Modality::Event))
    ));

    instrument.close().unwrap();
    assert!(matches!(
        instrument.trial().set_config(&events_only(16)),
        Err(SdkError::Closed)
    ));
}

#[test]
fn test_concurrent_producer_and_consumer() {
    const COUNT: u64 = 4_000;
    let instrument = open_instrument();
    instrument
        .trial()
        .set_config(&TrialConfig {
            absolute: true,
            ..events_only(COUNT as usize)
        })
        .unwrap();
    let mut router = instrument.router();

    let received = thread::scope(|scope| {
        scope.spawn(move || {
            for time in 1..=COUNT {
                router.route(&Packet::spike(time, 9, 1));
            }
        });

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut received = Vec::new();
        while (received.len() as u64) < COUNT && Instant::now() < deadline {
            let data = read_all(&instrument, TrialRequest::only(Modality::Event), true);
            if let Some(channel) = data.events.unwrap().channels.first() {
                received.extend(ticks(&channel.timestamps[1]));
            }
        }
        received
    });

    assert_eq!(received, (1..=COUNT).collect::<Vec<_>>());
}
