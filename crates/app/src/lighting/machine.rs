//! Lighting state machine — one room's modes, timers and light commands.
//!
//! The machine is driven by [`RoomInput`]s delivered one at a time. It never
//! blocks the event source: state reads and light commands are awaited, but
//! timers only post a [`RoomInput::TimerFired`] back onto the room queue.

use std::collections::BTreeSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use roomlights_domain::entity::EntityState;
use roomlights_domain::error::RoomLightsError;
use roomlights_domain::event::StateChange;
use roomlights_domain::id::EntityId;
use roomlights_domain::mode::{ManagerState, Period};
use roomlights_domain::notification::RoomNotification;
use roomlights_domain::room::{LuxGate, LuxLimit, RoomConfig};
use roomlights_domain::service::LightService;

use super::echo::EchoTracker;
use super::timers::{TimerKind, TimerSlots, TimerToken};
use crate::ports::{CommandSink, DelayedActionScheduler, EntityEventSource, NotificationPublisher};

/// One unit of work for a room.
#[derive(Debug, Clone)]
pub enum RoomInput {
    StateChanged(StateChange),
    TimerFired(TimerToken),
    Shutdown,
}

/// Mutable state of a room, owned by its machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeState {
    pub mode: ManagerState,
    pub period: Period,
    /// Control entities changed by hand since the last override began.
    pub overridden: BTreeSet<EntityId>,
    /// Last known presence value.
    pub presence: bool,
    /// Last known keep-alive value (always `false` when not configured).
    pub keep_alive: bool,
}

/// Reactive controller for a single room.
pub struct LightingStateMachine<ES, CS, DS, NP>
where
    DS: DelayedActionScheduler,
{
    config: Arc<RoomConfig>,
    source: ES,
    sink: CS,
    scheduler: DS,
    publisher: NP,
    queue: mpsc::UnboundedSender<RoomInput>,
    state: RuntimeState,
    timers: TimerSlots,
    echoes: EchoTracker,
    torn_down: bool,
}

impl<ES, CS, DS, NP> LightingStateMachine<ES, CS, DS, NP>
where
    ES: EntityEventSource,
    CS: CommandSink,
    DS: DelayedActionScheduler,
    NP: NotificationPublisher,
{
    /// Build a machine from the current values of the room's entities.
    ///
    /// No light command is issued and no timer is armed: the lights are
    /// assumed to already match the derived mode. Timer firings are posted
    /// to `queue`.
    pub async fn initialize(
        config: Arc<RoomConfig>,
        source: ES,
        sink: CS,
        scheduler: DS,
        publisher: NP,
        queue: mpsc::UnboundedSender<RoomInput>,
    ) -> Self {
        let presence = read_state(&source, &config.presence_entity).await.is_on();
        let keep_alive = match &config.keep_alive_entity {
            Some(entity_id) => read_state(&source, entity_id).await.is_on(),
            None => false,
        };
        let enabled = match &config.enabled_switch_entity {
            Some(entity_id) => read_state(&source, entity_id).await != EntityState::Off,
            None => true,
        };
        let period = config.period_for(&read_state(&source, &config.house_mode_entity).await);

        let mode = if !enabled {
            ManagerState::Disabled
        } else if presence || keep_alive {
            ManagerState::Active
        } else {
            ManagerState::Idle
        };
        tracing::info!(room = %config.name, %mode, %period, "room initialized");

        Self {
            config,
            source,
            sink,
            scheduler,
            publisher,
            queue,
            state: RuntimeState {
                mode,
                period,
                overridden: BTreeSet::new(),
                presence,
                keep_alive,
            },
            timers: TimerSlots::default(),
            echoes: EchoTracker::default(),
            torn_down: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    #[must_use]
    pub fn mode(&self) -> ManagerState {
        self.state.mode
    }

    #[must_use]
    pub fn period(&self) -> Period {
        self.state.period
    }

    #[must_use]
    pub fn is_timer_armed(&self, kind: TimerKind) -> bool {
        self.timers.is_armed(kind)
    }

    /// Number of timers currently armed (at most two).
    #[must_use]
    pub fn live_timers(&self) -> usize {
        self.timers.live_count()
    }

    /// Process one input. Returns [`ControlFlow::Break`] once the machine
    /// has been torn down.
    pub async fn handle(&mut self, input: RoomInput) -> ControlFlow<()> {
        if self.torn_down {
            return ControlFlow::Break(());
        }
        match input {
            RoomInput::StateChanged(change) => self.on_state_changed(change).await,
            RoomInput::TimerFired(token) => self.on_timer_fired(token).await,
            RoomInput::Shutdown => {
                self.teardown();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_state_changed(&mut self, change: StateChange) {
        let config = Arc::clone(&self.config);
        let entity_id = &change.entity_id;

        if *entity_id == config.presence_entity {
            self.state.presence = change.new_state.is_on();
            if self.state.presence {
                self.on_occupied().await;
            } else {
                self.schedule_turn_off_if_vacant().await;
            }
        } else if config.keep_alive_entity.as_ref() == Some(entity_id) {
            self.state.keep_alive = change.new_state.is_on();
            if self.state.keep_alive {
                self.on_occupied().await;
            } else {
                self.schedule_turn_off_if_vacant().await;
            }
        } else if config.enabled_switch_entity.as_ref() == Some(entity_id) {
            match change.new_state {
                EntityState::On => self.enable().await,
                EntityState::Off => self.disable().await,
                _ => {}
            }
        } else if *entity_id == config.house_mode_entity {
            self.on_house_mode(&change.new_state).await;
        } else if config.is_control_entity(entity_id) {
            self.on_control_changed(&change).await;
        }
    }

    fn is_occupied(&self) -> bool {
        self.state.presence || (self.config.keep_alive_entity.is_some() && self.state.keep_alive)
    }

    async fn on_occupied(&mut self) {
        match self.state.mode {
            ManagerState::Disabled => {}
            ManagerState::Active => self.cancel_timer(TimerKind::TurnOff),
            ManagerState::Idle | ManagerState::Override => {
                self.cancel_timer(TimerKind::TurnOff);
                self.cancel_timer(TimerKind::OverrideRevert);
                self.state.overridden.clear();
                self.set_mode(ManagerState::Active).await;
                if self.lux_allows_turn_on().await {
                    self.command_period(LightService::TurnOn, self.state.period)
                        .await;
                } else {
                    tracing::info!(room = %self.config.name, "room is bright enough, lights stay off");
                }
            }
        }
    }

    async fn schedule_turn_off_if_vacant(&mut self) {
        if self.state.mode != ManagerState::Active
            || self.is_occupied()
            || self.timers.is_armed(TimerKind::TurnOff)
        {
            return;
        }
        let delay = self.config.timeout_for(self.state.period);
        self.arm_timer(TimerKind::TurnOff, delay);
        tracing::debug!(room = %self.config.name, ?delay, "room vacant, turn-off scheduled");
        self.notify(RoomNotification::TurnOffScheduled {
            room: self.config.name.clone(),
            delay,
        })
        .await;
    }

    async fn on_timer_fired(&mut self, token: TimerToken) {
        if !self.timers.claim(token) {
            tracing::debug!(room = %self.config.name, kind = ?token.kind(), "ignoring stale timer");
            return;
        }
        match (token.kind(), self.state.mode) {
            (TimerKind::TurnOff, ManagerState::Active) => {
                self.set_mode(ManagerState::Idle).await;
                self.command_period(LightService::TurnOff, self.state.period)
                    .await;
            }
            (TimerKind::OverrideRevert, ManagerState::Override) => {
                self.set_mode(ManagerState::Idle).await;
                self.command_period(LightService::TurnOff, self.state.period)
                    .await;
                self.state.overridden.clear();
            }
            (kind, mode) => {
                tracing::debug!(room = %self.config.name, ?kind, %mode, "timer fired in unexpected mode");
            }
        }
    }

    async fn on_house_mode(&mut self, house_mode: &EntityState) {
        let from = self.state.period;
        let to = self.config.period_for(house_mode);
        if from == to {
            return;
        }
        if self.state.mode == ManagerState::Active {
            self.command_period(LightService::TurnOff, from).await;
            self.command_period(LightService::TurnOn, to).await;
        }
        self.state.period = to;
        tracing::info!(room = %self.config.name, %from, %to, mode = %self.state.mode, "period changed");
        self.notify(RoomNotification::PeriodChanged {
            room: self.config.name.clone(),
            from,
            to,
        })
        .await;
    }

    async fn disable(&mut self) {
        self.cancel_timer(TimerKind::TurnOff);
        self.cancel_timer(TimerKind::OverrideRevert);
        self.set_mode(ManagerState::Disabled).await;
    }

    async fn enable(&mut self) {
        if self.state.mode != ManagerState::Disabled {
            return;
        }
        self.state.presence = read_state(&self.source, &self.config.presence_entity)
            .await
            .is_on();
        if let Some(entity_id) = &self.config.keep_alive_entity {
            self.state.keep_alive = read_state(&self.source, entity_id).await.is_on();
        }
        let mode = if self.is_occupied() {
            ManagerState::Active
        } else {
            ManagerState::Idle
        };
        self.set_mode(mode).await;
    }

    async fn on_control_changed(&mut self, change: &StateChange) {
        let entity_id = &change.entity_id;
        if self.echoes.consume(entity_id, &change.new_state) {
            tracing::trace!(room = %self.config.name, %entity_id, "echo of own command");
            return;
        }
        if change.is_unchanged() || !change.new_state.is_binary() {
            return;
        }
        if !self
            .config
            .control_entities_for(self.state.period)
            .contains(entity_id)
        {
            return;
        }
        match self.state.mode {
            ManagerState::Disabled => return,
            ManagerState::Override => {}
            ManagerState::Idle | ManagerState::Active => {
                self.cancel_timer(TimerKind::TurnOff);
                self.set_mode(ManagerState::Override).await;
            }
        }

        tracing::info!(
            room = %self.config.name,
            %entity_id,
            state = %change.new_state,
            "manual override detected"
        );
        self.state.overridden.insert(entity_id.clone());
        self.notify(RoomNotification::OverrideDetected {
            room: self.config.name.clone(),
            entity_id: entity_id.clone(),
        })
        .await;

        let delay = self.config.override_timeout;
        if !self.timers.is_armed(TimerKind::OverrideRevert) {
            self.arm_timer(TimerKind::OverrideRevert, delay);
        }
        self.notify(RoomNotification::OverrideTimerSet {
            room: self.config.name.clone(),
            delay,
        })
        .await;
    }

    async fn lux_allows_turn_on(&self) -> bool {
        let Some(gate) = &self.config.lux_gate else {
            return true;
        };
        let reading = read_state(&self.source, &gate.sensor).await;
        let limit = match &gate.limit {
            LuxLimit::Fixed(limit) => Some(*limit),
            LuxLimit::Entity(entity_id) => read_state(&self.source, entity_id).await.as_number(),
        };
        LuxGate::allows_turn_on(&reading, limit)
    }

    async fn set_mode(&mut self, to: ManagerState) {
        let from = self.state.mode;
        if from == to {
            return;
        }
        self.state.mode = to;
        tracing::info!(room = %self.config.name, %from, %to, "mode changed");
        self.notify(RoomNotification::ModeChanged {
            room: self.config.name.clone(),
            from,
            to,
        })
        .await;
    }

    async fn command_period(&mut self, service: LightService, period: Period) {
        let config = Arc::clone(&self.config);
        for entity_id in config.control_entities_for(period) {
            self.command(entity_id, service).await;
        }
    }

    async fn command(&mut self, entity_id: &EntityId, service: LightService) {
        if self.torn_down {
            return;
        }
        let expected = service.target_state();
        self.echoes.expect(entity_id, expected.clone());
        tracing::debug!(room = %self.config.name, %entity_id, %service, "issuing light command");

        if let Err(err) = self.sink.call_service(entity_id, service).await {
            self.echoes.withdraw(entity_id, &expected);
            let error = describe(&err);
            tracing::warn!(room = %self.config.name, %entity_id, %service, %error, "light command failed");
            self.notify(RoomNotification::CommandFailed {
                room: self.config.name.clone(),
                entity_id: entity_id.clone(),
                service,
                error,
            })
            .await;
        }
    }

    async fn notify(&self, notification: RoomNotification) {
        if let Err(err) = self.publisher.publish(notification).await {
            tracing::debug!(room = %self.config.name, error = %describe(&err), "notification dropped");
        }
    }

    fn arm_timer(&mut self, kind: TimerKind, delay: Duration) {
        let token = self.timers.next_token(kind);
        let queue = self.queue.clone();
        let handle = self.scheduler.arm(
            delay,
            Box::new(move || {
                // the room may already be gone
                let _ = queue.send(RoomInput::TimerFired(token));
            }),
        );
        if let Some(previous) = self.timers.store(token, handle) {
            self.scheduler.cancel(previous);
        }
    }

    fn cancel_timer(&mut self, kind: TimerKind) {
        if let Some(handle) = self.timers.take(kind) {
            self.scheduler.cancel(handle);
            tracing::trace!(room = %self.config.name, ?kind, "timer cancelled");
        }
    }
}

impl<ES, CS, DS, NP> LightingStateMachine<ES, CS, DS, NP>
where
    DS: DelayedActionScheduler,
{
    /// Cancel live timers and stop issuing commands. Idempotent.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        for handle in self.timers.take_all() {
            self.scheduler.cancel(handle);
        }
        self.echoes.clear();
        tracing::info!(room = %self.config.name, "room torn down");
    }
}

impl<ES, CS, DS, NP> Drop for LightingStateMachine<ES, CS, DS, NP>
where
    DS: DelayedActionScheduler,
{
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn read_state<ES: EntityEventSource>(source: &ES, entity_id: &EntityId) -> EntityState {
    match source.current_state(entity_id).await {
        Ok(state) => state,
        Err(err) => {
            tracing::warn!(%entity_id, error = %describe(&err), "failed to read entity state");
            EntityState::Unknown
        }
    }
}

/// Render an error with its sources, outermost first.
fn describe(err: &RoomLightsError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomlights_domain::error::CommandError;
    use std::collections::{HashMap, HashSet};
    use std::future::Future;
    use std::sync::Mutex;

    use crate::ports::{StateStream, TimerAction, TimerHandle};

    const PRESENCE: &str = "binary_sensor.my_motion_sensor";
    const KEEP_ALIVE: &str = "input_boolean.keep_alive";
    const ENABLED: &str = "switch.my_switch";
    const HOUSE_MODE: &str = "input_select.house_mode";
    const LIGHT: &str = "light.my_light";
    const LIGHT_2: &str = "light.my_light_2";
    const NIGHT_LIGHT: &str = "light.my_night_light";
    const LUX: &str = "sensor.my_lux";
    const LUX_LIMIT: &str = "input_number.my_lux_limit";

    fn id(raw: &str) -> EntityId {
        raw.parse().unwrap()
    }

    // ── Fake entity source ─────────────────────────────────────────

    #[derive(Default)]
    struct FakeSource {
        states: Mutex<HashMap<EntityId, EntityState>>,
    }

    impl FakeSource {
        fn set(&self, entity_id: &str, state: &str) -> Option<EntityState> {
            self.states
                .lock()
                .unwrap()
                .insert(id(entity_id), EntityState::parse(state))
        }
    }

    impl EntityEventSource for FakeSource {
        fn current_state(
            &self,
            entity_id: &EntityId,
        ) -> impl Future<Output = Result<EntityState, RoomLightsError>> + Send {
            let state = self
                .states
                .lock()
                .unwrap()
                .get(entity_id)
                .cloned()
                .unwrap_or_default();
            async { Ok(state) }
        }

        fn subscribe(&self, _entity_id: &EntityId) -> Result<StateStream, RoomLightsError> {
            Ok(Box::pin(tokio_stream::empty()))
        }
    }

    // ── Spy command sink ───────────────────────────────────────────

    #[derive(Default)]
    struct SpySink {
        calls: Mutex<Vec<(EntityId, LightService)>>,
        unreachable: Mutex<HashSet<EntityId>>,
    }

    impl SpySink {
        fn calls(&self) -> Vec<(EntityId, LightService)> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, entity_id: &str, service: LightService) -> usize {
            let target = id(entity_id);
            self.calls()
                .into_iter()
                .filter(|(e, s)| *e == target && *s == service)
                .count()
        }
    }

    impl CommandSink for SpySink {
        fn call_service(
            &self,
            entity_id: &EntityId,
            service: LightService,
        ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
            self.calls.lock().unwrap().push((entity_id.clone(), service));
            let result = if self.unreachable.lock().unwrap().contains(entity_id) {
                Err(CommandError::Unreachable(entity_id.clone()).into())
            } else {
                Ok(())
            };
            async { result }
        }
    }

    // ── Fake scheduler with a manual clock ─────────────────────────

    #[derive(Default)]
    struct FakeClock {
        now: Duration,
        next_id: u64,
        arm_calls: Vec<Duration>,
        live: Vec<(TimerHandle, Duration, TimerAction)>,
    }

    #[derive(Default)]
    struct FakeScheduler {
        clock: Mutex<FakeClock>,
    }

    impl FakeScheduler {
        fn arm_calls(&self) -> Vec<Duration> {
            self.clock.lock().unwrap().arm_calls.clone()
        }

        fn live_count(&self) -> usize {
            self.clock.lock().unwrap().live.len()
        }

        /// Move the clock forward and run every action that became due.
        fn advance(&self, by: Duration) {
            let mut due = {
                let mut clock = self.clock.lock().unwrap();
                clock.now += by;
                let now = clock.now;
                let (due, pending): (Vec<_>, Vec<_>) =
                    clock.live.drain(..).partition(|(_, at, _)| *at <= now);
                clock.live = pending;
                due
            };
            due.sort_by_key(|(_, at, _)| *at);
            for (_, _, action) in due {
                action();
            }
        }
    }

    impl DelayedActionScheduler for FakeScheduler {
        fn arm(&self, delay: Duration, action: TimerAction) -> TimerHandle {
            let mut clock = self.clock.lock().unwrap();
            clock.next_id += 1;
            let handle = TimerHandle::new(clock.next_id);
            let at = clock.now + delay;
            clock.arm_calls.push(delay);
            clock.live.push((handle, at, action));
            handle
        }

        fn cancel(&self, handle: TimerHandle) {
            let mut clock = self.clock.lock().unwrap();
            clock.live.retain(|(h, _, _)| *h != handle);
        }
    }

    // ── Spy publisher ──────────────────────────────────────────────

    #[derive(Default)]
    struct SpyPublisher {
        notifications: Mutex<Vec<RoomNotification>>,
    }

    impl SpyPublisher {
        fn count(&self, predicate: impl Fn(&RoomNotification) -> bool) -> usize {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|n| predicate(n))
                .count()
        }
    }

    impl NotificationPublisher for SpyPublisher {
        fn publish(
            &self,
            notification: RoomNotification,
        ) -> impl Future<Output = Result<(), RoomLightsError>> + Send {
            self.notifications.lock().unwrap().push(notification);
            async { Ok(()) }
        }
    }

    // ── Harness ────────────────────────────────────────────────────

    type Machine =
        LightingStateMachine<Arc<FakeSource>, Arc<SpySink>, Arc<FakeScheduler>, Arc<SpyPublisher>>;

    struct Harness {
        machine: Machine,
        inbox: mpsc::UnboundedReceiver<RoomInput>,
        source: Arc<FakeSource>,
        sink: Arc<SpySink>,
        scheduler: Arc<FakeScheduler>,
        publisher: Arc<SpyPublisher>,
    }

    impl Harness {
        async fn new(config: RoomConfig, states: &[(&str, &str)]) -> Self {
            let source = Arc::new(FakeSource::default());
            for (entity_id, state) in states {
                source.set(entity_id, state);
            }
            let sink = Arc::new(SpySink::default());
            let scheduler = Arc::new(FakeScheduler::default());
            let publisher = Arc::new(SpyPublisher::default());
            let (queue, inbox) = mpsc::unbounded_channel();
            let machine = LightingStateMachine::initialize(
                Arc::new(config),
                Arc::clone(&source),
                Arc::clone(&sink),
                Arc::clone(&scheduler),
                Arc::clone(&publisher),
                queue,
            )
            .await;
            Self {
                machine,
                inbox,
                source,
                sink,
                scheduler,
                publisher,
            }
        }

        /// Simulate the bus reporting a new state for `entity_id`.
        async fn change(&mut self, entity_id: &str, state: &str) {
            let old_state = self.source.set(entity_id, state);
            let change = StateChange::new(id(entity_id), old_state, EntityState::parse(state));
            let _ = self.machine.handle(RoomInput::StateChanged(change)).await;
            self.pump().await;
        }

        async fn advance_secs(&mut self, secs: u64) {
            self.scheduler.advance(Duration::from_secs(secs));
            self.pump().await;
        }

        async fn pump(&mut self) {
            while let Ok(input) = self.inbox.try_recv() {
                let _ = self.machine.handle(input).await;
            }
        }
    }

    fn room() -> roomlights_domain::room::RoomConfigBuilder {
        RoomConfig::builder()
            .name("test_room")
            .presence_entity(id(PRESENCE))
            .house_mode_entity(id(HOUSE_MODE))
            .night_mode_state("night")
            .control_entity(id(LIGHT))
            .night_control_entity(id(NIGHT_LIGHT))
            .timeout(Duration::from_secs(60))
            .night_timeout(Duration::from_secs(30))
            .override_timeout(Duration::from_secs(600))
    }

    fn room_with_keep_alive() -> RoomConfig {
        room().keep_alive_entity(id(KEEP_ALIVE)).build().unwrap()
    }

    async fn idle_room() -> Harness {
        Harness::new(
            room().build().unwrap(),
            &[(PRESENCE, "off"), (LIGHT, "off"), (HOUSE_MODE, "day")],
        )
        .await
    }

    // ── Initialization ─────────────────────────────────────────────

    #[tokio::test]
    async fn should_initialize_idle_when_nobody_is_present() {
        let h = idle_room().await;
        assert_eq!(h.machine.mode(), ManagerState::Idle);
        assert_eq!(h.machine.period(), Period::Day);
        assert!(h.sink.calls().is_empty());
        assert_eq!(h.machine.live_timers(), 0);
    }

    #[tokio::test]
    async fn should_initialize_active_without_commands_when_present() {
        let h = Harness::new(room().build().unwrap(), &[(PRESENCE, "on")]).await;
        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert!(h.sink.calls().is_empty());
        assert_eq!(h.scheduler.live_count(), 0);
    }

    #[tokio::test]
    async fn should_initialize_active_when_only_keep_alive_is_on() {
        let h = Harness::new(room_with_keep_alive(), &[(PRESENCE, "off"), (KEEP_ALIVE, "on")]).await;
        assert_eq!(h.machine.mode(), ManagerState::Active);
    }

    #[tokio::test]
    async fn should_initialize_disabled_when_enabled_switch_is_off() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let h = Harness::new(config, &[(PRESENCE, "on"), (ENABLED, "off")]).await;
        assert_eq!(h.machine.mode(), ManagerState::Disabled);
    }

    #[tokio::test]
    async fn should_initialize_night_period_from_house_mode() {
        let h = Harness::new(room().build().unwrap(), &[(HOUSE_MODE, "night")]).await;
        assert_eq!(h.machine.period(), Period::Night);
    }

    #[tokio::test]
    async fn should_fall_back_to_day_when_house_mode_is_unknown() {
        let h = Harness::new(room().build().unwrap(), &[(HOUSE_MODE, "party")]).await;
        assert_eq!(h.machine.period(), Period::Day);
    }

    // ── Presence / keep-alive ──────────────────────────────────────

    #[tokio::test]
    async fn should_turn_on_day_lights_when_presence_turns_on() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert_eq!(h.sink.calls(), vec![(id(LIGHT), LightService::TurnOn)]);
    }

    #[tokio::test]
    async fn should_ignore_presence_when_disabled() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(PRESENCE, "off"), (ENABLED, "off")]).await;

        h.change(PRESENCE, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Disabled);
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn should_turn_off_exactly_once_after_timeout() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;

        h.advance_secs(59).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);
        assert_eq!(h.machine.mode(), ManagerState::Active);

        h.advance_secs(1).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.machine.mode(), ManagerState::Idle);

        h.advance_secs(600).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 1);
    }

    #[tokio::test]
    async fn should_cancel_turn_off_when_presence_returns() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;
        h.advance_secs(30).await;
        h.change(PRESENCE, "on").await;

        h.advance_secs(120).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);
        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert_eq!(h.scheduler.live_count(), 0);
    }

    #[tokio::test]
    async fn should_arm_single_timer_for_repeated_presence_off() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;
        h.change(PRESENCE, "off").await;
        h.change(PRESENCE, "off").await;

        assert_eq!(h.scheduler.arm_calls(), vec![Duration::from_secs(60)]);
        assert_eq!(h.scheduler.live_count(), 1);
    }

    #[tokio::test]
    async fn should_hold_lights_while_keep_alive_is_on() {
        let mut h = Harness::new(
            room_with_keep_alive(),
            &[(PRESENCE, "off"), (KEEP_ALIVE, "off"), (LIGHT, "off")],
        )
        .await;

        h.change(PRESENCE, "on").await;
        h.change(KEEP_ALIVE, "on").await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);

        h.change(PRESENCE, "off").await;
        h.advance_secs(60).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);

        h.change(KEEP_ALIVE, "off").await;
        h.advance_secs(60).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.machine.mode(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn should_not_schedule_turn_off_when_keep_alive_drops_but_presence_stays() {
        let mut h = Harness::new(room_with_keep_alive(), &[(PRESENCE, "on"), (KEEP_ALIVE, "on")]).await;

        h.change(KEEP_ALIVE, "off").await;

        assert!(!h.machine.is_timer_armed(TimerKind::TurnOff));
        assert_eq!(h.machine.mode(), ManagerState::Active);
    }

    #[tokio::test]
    async fn should_use_night_timeout_at_night() {
        let mut h = Harness::new(room().build().unwrap(), &[(HOUSE_MODE, "night")]).await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;

        assert_eq!(h.scheduler.arm_calls(), vec![Duration::from_secs(30)]);
        h.advance_secs(30).await;
        assert_eq!(h.sink.count(NIGHT_LIGHT, LightService::TurnOff), 1);
    }

    #[tokio::test]
    async fn should_publish_turn_off_scheduled() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;

        let scheduled = h.publisher.count(|n| {
            matches!(n, RoomNotification::TurnOffScheduled { delay, .. } if *delay == Duration::from_secs(60))
        });
        assert_eq!(scheduled, 1);
    }

    // ── Timer races ────────────────────────────────────────────────

    #[tokio::test]
    async fn should_ignore_firing_that_lost_the_race_with_cancellation() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;

        // the timer fires, but presence comes back before the firing is processed
        h.scheduler.advance(Duration::from_secs(60));
        let fired = h.inbox.try_recv().unwrap();
        let present = StateChange::new(id(PRESENCE), Some(EntityState::Off), EntityState::On);
        let _ = h.machine.handle(RoomInput::StateChanged(present)).await;
        let _ = h.machine.handle(fired).await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);
    }

    // ── House mode ─────────────────────────────────────────────────

    #[tokio::test]
    async fn should_swap_lights_in_order_when_switching_to_night_while_active() {
        let mut h = Harness::new(
            room().build().unwrap(),
            &[(PRESENCE, "on"), (LIGHT, "on"), (NIGHT_LIGHT, "off"), (HOUSE_MODE, "day")],
        )
        .await;

        h.change(HOUSE_MODE, "night").await;

        assert_eq!(
            h.sink.calls(),
            vec![
                (id(LIGHT), LightService::TurnOff),
                (id(NIGHT_LIGHT), LightService::TurnOn),
            ]
        );
        assert_eq!(h.machine.period(), Period::Night);
        assert_eq!(h.machine.mode(), ManagerState::Active);
    }

    #[tokio::test]
    async fn should_swap_lights_when_switching_to_day_while_active() {
        let mut h = Harness::new(
            room().build().unwrap(),
            &[(PRESENCE, "on"), (LIGHT, "off"), (NIGHT_LIGHT, "on"), (HOUSE_MODE, "night")],
        )
        .await;

        h.change(HOUSE_MODE, "day").await;

        assert_eq!(h.sink.count(NIGHT_LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);
    }

    #[tokio::test]
    async fn should_swap_lights_when_kept_active_by_keep_alive_only() {
        let mut h = Harness::new(
            room_with_keep_alive(),
            &[
                (PRESENCE, "off"),
                (KEEP_ALIVE, "off"),
                (LIGHT, "off"),
                (NIGHT_LIGHT, "off"),
                (HOUSE_MODE, "day"),
            ],
        )
        .await;

        h.change(PRESENCE, "on").await;
        h.change(KEEP_ALIVE, "on").await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);

        h.change(PRESENCE, "off").await;
        h.advance_secs(60).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);

        h.change(HOUSE_MODE, "night").await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.sink.count(NIGHT_LIGHT, LightService::TurnOn), 1);
        assert_eq!(h.machine.mode(), ManagerState::Active);
    }

    #[tokio::test]
    async fn should_reconfigure_without_commands_when_idle() {
        let mut h = idle_room().await;

        h.change(HOUSE_MODE, "night").await;

        assert!(h.sink.calls().is_empty());
        assert_eq!(h.machine.period(), Period::Night);
        assert_eq!(h.machine.mode(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn should_target_new_period_for_override_detection_after_switch() {
        let mut h = idle_room().await;
        h.change(HOUSE_MODE, "night").await;

        h.change(LIGHT, "on").await;
        assert_eq!(h.machine.mode(), ManagerState::Idle);

        h.change(NIGHT_LIGHT, "on").await;
        assert_eq!(h.machine.mode(), ManagerState::Override);
    }

    #[tokio::test]
    async fn should_turn_on_new_period_lights_when_presence_follows_switch() {
        let mut h = idle_room().await;
        h.change(HOUSE_MODE, "night").await;
        h.change(PRESENCE, "on").await;

        assert_eq!(h.sink.calls(), vec![(id(NIGHT_LIGHT), LightService::TurnOn)]);
    }

    #[tokio::test]
    async fn should_ignore_house_mode_change_within_same_period() {
        let mut h = Harness::new(room().build().unwrap(), &[(PRESENCE, "on"), (HOUSE_MODE, "day")]).await;

        h.change(HOUSE_MODE, "evening").await;

        assert!(h.sink.calls().is_empty());
        assert_eq!(h.publisher.count(|n| matches!(n, RoomNotification::PeriodChanged { .. })), 0);
    }

    #[tokio::test]
    async fn should_turn_off_current_period_lights_when_timer_fires_after_switch() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;
        h.change(HOUSE_MODE, "night").await;

        h.advance_secs(60).await;

        assert_eq!(h.sink.count(NIGHT_LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 1);
        assert_eq!(h.machine.mode(), ManagerState::Idle);
    }

    // ── Overrides ──────────────────────────────────────────────────

    #[tokio::test]
    async fn should_enter_override_when_light_changed_by_hand() {
        let mut h = idle_room().await;

        h.change(LIGHT, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Override);
        assert!(h.machine.state().overridden.contains(&id(LIGHT)));
        assert_eq!(h.scheduler.live_count(), 1);
        assert_eq!(h.scheduler.arm_calls(), vec![Duration::from_secs(600)]);
    }

    #[tokio::test]
    async fn should_keep_single_revert_timer_for_two_overrides() {
        let config = room().control_entity(id(LIGHT_2)).build().unwrap();
        let mut h = Harness::new(
            config,
            &[(PRESENCE, "off"), (LIGHT, "off"), (LIGHT_2, "off")],
        )
        .await;

        h.change(LIGHT, "on").await;
        h.change(LIGHT_2, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Override);
        assert_eq!(h.scheduler.live_count(), 1);
        assert_eq!(h.machine.live_timers(), 1);
        let timer_set = h.publisher.count(|n| {
            matches!(n, RoomNotification::OverrideTimerSet { delay, .. } if *delay == Duration::from_secs(600))
        });
        assert_eq!(timer_set, 2);
        assert_eq!(h.machine.state().overridden.len(), 2);
    }

    #[tokio::test]
    async fn should_cancel_turn_off_timer_when_overridden_while_active() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;
        assert!(h.machine.is_timer_armed(TimerKind::TurnOff));
        h.change(LIGHT, "on").await;

        h.change(LIGHT, "off").await;

        assert_eq!(h.machine.mode(), ManagerState::Override);
        assert!(!h.machine.is_timer_armed(TimerKind::TurnOff));
        assert!(h.machine.is_timer_armed(TimerKind::OverrideRevert));
        assert_eq!(h.scheduler.live_count(), 1);
    }

    #[tokio::test]
    async fn should_revert_override_after_timeout() {
        let mut h = idle_room().await;
        h.change(LIGHT, "on").await;

        h.advance_secs(600).await;

        assert_eq!(h.machine.mode(), ManagerState::Idle);
        assert_eq!(h.sink.calls(), vec![(id(LIGHT), LightService::TurnOff)]);
        assert!(h.machine.state().overridden.is_empty());
        assert_eq!(h.machine.live_timers(), 0);
    }

    #[tokio::test]
    async fn should_not_treat_echo_of_own_command_as_override() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;

        h.change(LIGHT, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
    }

    #[tokio::test]
    async fn should_not_treat_echoes_of_shared_light_as_override_during_switch() {
        let config = room()
            .control_entity(id("light.shared"))
            .night_control_entity(id("light.shared"))
            .build()
            .unwrap();
        let mut h = Harness::new(config, &[(PRESENCE, "on"), ("light.shared", "on")]).await;

        h.change(HOUSE_MODE, "night").await;
        h.change("light.shared", "off").await;
        h.change("light.shared", "on").await;
        h.change(LIGHT, "off").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert_eq!(h.sink.count("light.shared", LightService::TurnOff), 1);
        assert_eq!(h.sink.count("light.shared", LightService::TurnOn), 1);
    }

    #[tokio::test]
    async fn should_treat_contradicting_change_as_override() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(LIGHT, "on").await;

        h.change(LIGHT, "off").await;

        assert_eq!(h.machine.mode(), ManagerState::Override);
    }

    #[tokio::test]
    async fn should_ignore_unavailable_light() {
        let mut h = idle_room().await;

        h.change(LIGHT, "unavailable").await;

        assert_eq!(h.machine.mode(), ManagerState::Idle);
    }

    #[tokio::test]
    async fn should_ignore_override_when_disabled() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(ENABLED, "off"), (LIGHT, "off")]).await;

        h.change(LIGHT, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Disabled);
        assert_eq!(h.scheduler.live_count(), 0);
    }

    #[tokio::test]
    async fn should_resume_automation_when_presence_returns_during_override() {
        let mut h = idle_room().await;
        h.change(LIGHT, "on").await;

        h.change(PRESENCE, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert!(!h.machine.is_timer_armed(TimerKind::OverrideRevert));
        assert!(h.machine.state().overridden.is_empty());
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);

        h.advance_secs(600).await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOff), 0);
    }

    // ── Enabled switch ─────────────────────────────────────────────

    #[tokio::test]
    async fn should_disable_and_cancel_timers_without_commands() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(ENABLED, "on"), (PRESENCE, "on")]).await;
        h.change(PRESENCE, "off").await;
        assert_eq!(h.scheduler.live_count(), 1);

        h.change(ENABLED, "off").await;

        assert_eq!(h.machine.mode(), ManagerState::Disabled);
        assert_eq!(h.scheduler.live_count(), 0);
        h.advance_secs(600).await;
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn should_cancel_override_timer_when_disabled() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(ENABLED, "on"), (LIGHT, "off")]).await;
        h.change(LIGHT, "on").await;

        h.change(ENABLED, "off").await;

        assert_eq!(h.machine.live_timers(), 0);
        assert_eq!(h.scheduler.live_count(), 0);
    }

    #[tokio::test]
    async fn should_reevaluate_presence_without_commands_when_reenabled() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(ENABLED, "off"), (PRESENCE, "off")]).await;

        h.source.set(PRESENCE, "on");
        h.change(ENABLED, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn should_become_idle_when_reenabled_in_empty_room() {
        let config = room().enabled_switch_entity(id(ENABLED)).build().unwrap();
        let mut h = Harness::new(config, &[(ENABLED, "off"), (PRESENCE, "off")]).await;

        h.change(ENABLED, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Idle);
        assert!(h.sink.calls().is_empty());
    }

    // ── Command failures ───────────────────────────────────────────

    #[tokio::test]
    async fn should_report_failed_command_and_keep_state() {
        let mut h = idle_room().await;
        h.sink.unreachable.lock().unwrap().insert(id(LIGHT));

        h.change(PRESENCE, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        let failures = h.publisher.count(|n| {
            matches!(n, RoomNotification::CommandFailed { service: LightService::TurnOn, .. })
        });
        assert_eq!(failures, 1);
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);
    }

    #[tokio::test]
    async fn should_describe_failure_with_its_cause() {
        let mut h = idle_room().await;
        h.sink.unreachable.lock().unwrap().insert(id(LIGHT));

        h.change(PRESENCE, "on").await;

        let notifications = h.publisher.notifications.lock().unwrap().clone();
        let error = notifications.iter().find_map(|n| match n {
            RoomNotification::CommandFailed { error, .. } => Some(error.clone()),
            _ => None,
        });
        assert_eq!(
            error.as_deref(),
            Some("command error: entity light.my_light is unreachable")
        );
    }

    // ── Lux gate ───────────────────────────────────────────────────

    fn lux_room(limit: LuxLimit) -> RoomConfig {
        room()
            .lux_gate(LuxGate {
                sensor: id(LUX),
                limit,
            })
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn should_become_active_without_turning_on_when_bright() {
        let mut h = Harness::new(lux_room(LuxLimit::Fixed(50.0)), &[(LUX, "300")]).await;

        h.change(PRESENCE, "on").await;

        assert_eq!(h.machine.mode(), ManagerState::Active);
        assert!(h.sink.calls().is_empty());
    }

    #[tokio::test]
    async fn should_turn_on_when_darker_than_limit_entity() {
        let mut h = Harness::new(
            lux_room(LuxLimit::Entity(id(LUX_LIMIT))),
            &[(LUX, "10"), (LUX_LIMIT, "40")],
        )
        .await;

        h.change(PRESENCE, "on").await;

        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);
    }

    // ── Teardown ───────────────────────────────────────────────────

    #[tokio::test]
    async fn should_cancel_timers_and_stop_on_shutdown() {
        let mut h = idle_room().await;
        h.change(PRESENCE, "on").await;
        h.change(PRESENCE, "off").await;

        let flow = h.machine.handle(RoomInput::Shutdown).await;
        assert!(flow.is_break());
        assert_eq!(h.scheduler.live_count(), 0);

        h.change(PRESENCE, "on").await;
        assert_eq!(h.sink.count(LIGHT, LightService::TurnOn), 1);
    }

    #[tokio::test]
    async fn should_cancel_timers_when_dropped() {
        let mut h = idle_room().await;
        h.change(LIGHT, "on").await;
        let scheduler = Arc::clone(&h.scheduler);

        drop(h);

        assert_eq!(scheduler.live_count(), 0);
    }

    // ── Occupancy over arbitrary sequences ─────────────────────────

    mod occupancy {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Presence(bool),
            KeepAlive(bool),
            Elapse(u64),
            HouseMode(&'static str),
        }

        fn on_off(on: bool) -> &'static str {
            if on { "on" } else { "off" }
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![
                any::<bool>().prop_map(Step::Presence),
                any::<bool>().prop_map(Step::KeepAlive),
                prop::sample::select(vec![5_u64, 30, 61]).prop_map(Step::Elapse),
                prop::sample::select(vec!["day", "night"]).prop_map(Step::HouseMode),
            ]
        }

        async fn run(steps: Vec<Step>) -> Result<(), TestCaseError> {
            let mut h = Harness::new(
                room_with_keep_alive(),
                &[(PRESENCE, "off"), (KEEP_ALIVE, "off"), (HOUSE_MODE, "day")],
            )
            .await;
            let (mut presence, mut keep_alive) = (false, false);

            for step in steps {
                match step {
                    Step::Presence(on) => {
                        presence = on;
                        h.change(PRESENCE, on_off(on)).await;
                    }
                    Step::KeepAlive(on) => {
                        keep_alive = on;
                        h.change(KEEP_ALIVE, on_off(on)).await;
                    }
                    Step::Elapse(secs) => h.advance_secs(secs).await,
                    Step::HouseMode(mode) => h.change(HOUSE_MODE, mode).await,
                }

                let mode = h.machine.mode();
                let turn_off_armed = h.machine.is_timer_armed(TimerKind::TurnOff);
                if presence || keep_alive {
                    prop_assert_eq!(mode, ManagerState::Active);
                    prop_assert!(!turn_off_armed, "turn-off armed while occupied");
                } else if mode == ManagerState::Active {
                    prop_assert!(turn_off_armed, "vacant active room without turn-off timer");
                } else {
                    prop_assert_eq!(mode, ManagerState::Idle);
                }
            }
            Ok(())
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(300))]

            #[test]
            fn should_stay_active_exactly_while_occupied(
                steps in prop::collection::vec(step(), 1..40),
            ) {
                tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap()
                    .block_on(run(steps))?;
            }
        }
    }
}
