use std::{cell::RefCell, marker::PhantomData, rc::Rc, time::Instant};

use bevy::prelude::*;
use shared::{LobbyService, P2pSubstrate, TransportEvent};

use crate::{CoordinatorEvent, MembershipCoordinator};

/// Transport lifecycle and data events surfaced to gameplay.
#[derive(Event, Debug, Clone)]
pub struct SessionTransportEvent(pub TransportEvent);

/// Role and lobby changes surfaced to gameplay.
#[derive(Event, Debug, Clone)]
pub struct LobbyCoordinatorEvent(pub CoordinatorEvent);

/// Non-send resource owning the coordinator and the event buffers its
/// listeners write into.
pub struct LobbyDriver<S: P2pSubstrate, L: LobbyService> {
    coordinator: MembershipCoordinator<S, L>,
    transport_events: Rc<RefCell<Vec<TransportEvent>>>,
    coordinator_events: Rc<RefCell<Vec<CoordinatorEvent>>>,
    activated: bool,
}

impl<S: P2pSubstrate, L: LobbyService> LobbyDriver<S, L> {
    pub fn new(mut coordinator: MembershipCoordinator<S, L>) -> Self {
        let transport_events = Rc::new(RefCell::new(Vec::new()));
        let coordinator_events = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&transport_events);
        coordinator.on_transport_event(move |event| sink.borrow_mut().push(event.clone()));
        let sink = Rc::clone(&coordinator_events);
        coordinator.on_coordinator_event(move |event| sink.borrow_mut().push(event.clone()));

        Self {
            coordinator,
            transport_events,
            coordinator_events,
            activated: false,
        }
    }

    pub fn coordinator(&self) -> &MembershipCoordinator<S, L> {
        &self.coordinator
    }

    pub fn coordinator_mut(&mut self) -> &mut MembershipCoordinator<S, L> {
        &mut self.coordinator
    }
}

/// Drives a [`LobbyDriver`] inserted with `App::insert_non_send_resource`.
pub struct LobbyPlugin<S, L> {
    _marker: PhantomData<fn() -> (S, L)>,
}

impl<S, L> Default for LobbyPlugin<S, L> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<S, L> Plugin for LobbyPlugin<S, L>
where
    S: P2pSubstrate + 'static,
    L: LobbyService + 'static,
{
    fn build(&self, app: &mut App) {
        app.add_event::<SessionTransportEvent>()
            .add_event::<LobbyCoordinatorEvent>();

        app.add_systems(PreUpdate, drive_coordinator::<S, L>);
    }
}

fn drive_coordinator<S, L>(
    driver: Option<NonSendMut<LobbyDriver<S, L>>>,
    mut transport_writer: EventWriter<SessionTransportEvent>,
    mut coordinator_writer: EventWriter<LobbyCoordinatorEvent>,
) where
    S: P2pSubstrate + 'static,
    L: LobbyService + 'static,
{
    let Some(mut driver) = driver else {
        return;
    };

    let now = Instant::now();
    if !driver.activated {
        driver.coordinator.activate(now);
        driver.activated = true;
    }
    driver.coordinator.tick(now);

    for event in driver.transport_events.borrow_mut().drain(..) {
        transport_writer.write(SessionTransportEvent(event));
    }
    for event in driver.coordinator_events.borrow_mut().drain(..) {
        coordinator_writer.write(LobbyCoordinatorEvent(event));
    }
}
