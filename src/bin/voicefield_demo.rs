use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use voicefield::{
    AudioManager, ClipDesc, OutputEngine, SignalSource, SpatialTier, ToneSource, Vec3,
    VoiceFieldDesc, VoiceFieldEvent, user_stream,
};

const RUN_TIME: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let mut tier = SpatialTier::High;
    let mut clip_path = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--tier" => {
                let value = args.next().context("--tier needs a value")?;
                tier = value.parse()?;
            }
            path => clip_path = Some(path.to_string()),
        }
    }

    let desc = VoiceFieldDesc::new()
        .sample_rate(48000)
        .block_size(1024)
        .tier(tier)
        .offset_radius(1.5);
    let block_size = desc.block_size;
    let sample_rate = desc.sample_rate;

    let mut manager = AudioManager::new(desc.clone())?;
    let events = manager.subscribe();
    log::info!(
        "Requested {} spatialization, running at {}",
        manager.tier(),
        manager.achieved_tier()
    );

    manager.set_local_user("me");
    for id in ["alice", "bob"] {
        manager.create_user(id);
    }

    // alice hums continuously
    manager.set_user_stream(
        "alice",
        Some(Box::new(ToneSource::new(180.0, 0.3, sample_rate))),
    )?;

    // bob arrives through a jitter buffer fed from another thread
    let (mut writer, reader) = user_stream(desc.stream_capacity);
    manager.set_user_stream("bob", Some(Box::new(reader)))?;
    std::thread::spawn(move || {
        let mut voice = ToneSource::new(220.0, 0.3, sample_rate);
        let mut packet = vec![0.0; 480];
        let started = Instant::now();
        while started.elapsed() < RUN_TIME {
            // 200 ms talking, 800 ms silent
            if started.elapsed().as_millis() % 1000 < 200 {
                voice.read(&mut packet);
            } else {
                packet.fill(0.0);
            }
            writer.write(&packet);
            std::thread::sleep(Duration::from_millis(10));
        }
    });

    if let Some(path) = clip_path {
        manager.create_clip("clip", ClipDesc::new(path).looping(true).auto_play(true), None)?;
        manager.wait_for_clip("clip", Duration::from_secs(10))?;
        manager.set_clip_position("clip", Vec3::new(2.0, 0.0, -2.0), Some(0.0));
    }

    let (mut engine, mut feed) = OutputEngine::new(desc)?;
    engine.start()?;
    manager.start();
    log::info!("Audio graph:\n{}", manager.print_graph());

    let started = Instant::now();
    while started.elapsed() < RUN_TIME {
        let t = started.elapsed().as_secs_f64();

        // walk alice around the listener
        let angle = t as f32 * 0.5;
        manager.set_user_position(
            "alice",
            Vec3::new(angle.sin() * 3.0, 0.0, -angle.cos() * 3.0),
            Some(0.1),
        );
        manager.update(t);

        while feed.vacant_frames() >= block_size {
            let block = manager.render_block();
            feed.push_block(block);
        }

        for event in events.try_iter() {
            match event {
                VoiceFieldEvent::AudioActivity { id, is_active } => {
                    log::info!("{} {}", id, if is_active { "started talking" } else { "went quiet" });
                }
                other => log::info!("{:?}", other),
            }
        }

        std::thread::sleep(Duration::from_millis(5));
    }

    engine.stop()?;
    log::info!(
        "Played {} frames with {} underruns",
        engine.frames_played(),
        engine.underruns()
    );
    Ok(())
}
