//! Property tests of the engine's delivery and timer guarantees

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;

use gossim_core::{Decimal, MapConfig, NodeId, NullReport, SimRng, TimerKey};
use gossim_engine::{
    AppContext, AppResult, AppSpawner, AppState, Application, ChannelConfig, ComEngine,
    EngineConfig, InitArgs, Message, Timer, Topology,
};
use proptest::prelude::*;

const CHATTY_TAG: u64 = 1;

/// Sends to a random neighbor every tick for `rounds` ticks, sometimes
/// broadcasting, and arms then cancels throwaway timers.
#[derive(Default)]
struct Chatty {
    rounds: u64,
    received: u64,
    cancelled: BTreeSet<TimerKey>,
    fired: Vec<TimerKey>,
}

impl Application for Chatty {
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
        self.rounds = args.params.get_or("rounds", 5)?;
        ctx.set_timeout(1, CHATTY_TAG)?;
        Ok(())
    }

    fn on_receive(&mut self, _msg: &Message, _ctx: &mut AppContext<'_>) -> AppResult {
        self.received += 1;
        Ok(())
    }

    fn on_tick(&mut self, timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
        self.fired.push(timer.key);
        if timer.tag != CHATTY_TAG || self.rounds == 0 {
            return Ok(());
        }
        self.rounds -= 1;

        let links: Vec<NodeId> = ctx.links().iter().copied().collect();
        if let Some(target) = ctx.rng().choose(&links).copied() {
            ctx.send(target, "C|x".to_string())?;
        }
        if ctx.rng().bernoulli(0.3) {
            ctx.broadcast("B|x".to_string())?;
        }

        // a throwaway timer, cancelled twice
        let doomed = ctx.set_timeout(2, 0)?;
        assert!(ctx.reset_timeout(doomed));
        assert!(!ctx.reset_timeout(doomed));
        self.cancelled.insert(doomed);

        ctx.set_timeout(1, CHATTY_TAG)?;
        Ok(())
    }

    fn state(&self) -> AppState {
        AppState {
            estimate: Decimal::from(self.received),
            aggregate: Decimal::from(self.received),
            input: Decimal::ZERO,
            summary: String::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn chatty() -> Box<dyn Application> {
    Box::<Chatty>::default()
}

fn engine_config(sync: bool) -> EngineConfig {
    if sync {
        EngineConfig::synchronous()
    } else {
        EngineConfig::asynchronous()
    }
}

proptest! {
    /// Once traffic stops, every message on every directed channel was
    /// either delivered or lost, and node counters agree with channels.
    #[test]
    fn prop_channel_accounting(
        nodes in 2usize..12,
        density in 0.2f64..1.0,
        loss in 0.0f64..0.6,
        sync in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let topology = Topology::random(nodes, density, &mut SimRng::new(seed));
        let config = engine_config(sync)
            .with_channel(ChannelConfig::lossy(loss))
            .with_max_ticks(50);
        let mut engine = ComEngine::new(&topology, None, config, 0, SimRng::new(seed));
        let spawner = AppSpawner::new(chatty, "chatty", Arc::new(MapConfig::new()));
        engine.install(spawner, &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();

        let mut sent = 0;
        let mut lost = 0;
        let mut received = 0;
        for (_, stats) in engine.all_channel_stats() {
            prop_assert_eq!(stats.sent, stats.delivered + stats.lost);
        }
        for node in engine.nodes() {
            sent += node.counters().sent;
            lost += node.counters().lost;
            received += node.counters().received;
        }
        let totals = engine.channel_totals();
        prop_assert_eq!(sent, totals.sent);
        prop_assert_eq!(lost, totals.lost);
        prop_assert_eq!(received, totals.delivered);
        prop_assert_eq!(sent, received + lost);
    }

    /// Cancelled timers never fire, in either model.
    #[test]
    fn prop_cancelled_timers_never_fire(
        nodes in 2usize..8,
        sync in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let topology = Topology::ring(nodes);
        let config = engine_config(sync).with_max_ticks(30);
        let mut engine = ComEngine::new(&topology, None, config, 0, SimRng::new(seed));
        let spawner = AppSpawner::new(
            chatty,
            "chatty",
            Arc::new(MapConfig::new().with("chatty", "rounds", 10)),
        );
        engine.install(spawner, &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();

        for id in 0..nodes {
            let app = engine.app::<Chatty>(NodeId::from_index(id)).unwrap();
            prop_assert_eq!(app.cancelled.len(), 10);
            for key in &app.fired {
                prop_assert!(!app.cancelled.contains(key));
            }
        }
    }
}
