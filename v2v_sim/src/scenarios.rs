//! Walker-sharing scenarios for the simulation harness.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// V2V-001: one vehicle sees a walker, a nearby vehicle learns it by relay
    Handoff,

    /// V2V-002: a vehicle beyond broadcast radius never learns the walker
    OutOfRange,

    /// V2V-003: knowledge hops across a moving relay to a vehicle that never
    /// met the observer
    Convoy,

    /// V2V-004: seeded fleet and crowd, checks fleet-wide merge invariants
    Crowd,

    /// V2V-005: a vehicle is torn down mid-run and leaves no live callbacks
    Teardown,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Handoff,
            ScenarioId::OutOfRange,
            ScenarioId::Convoy,
            ScenarioId::Crowd,
            ScenarioId::Teardown,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Handoff => "handoff",
            ScenarioId::OutOfRange => "out_of_range",
            ScenarioId::Convoy => "convoy",
            ScenarioId::Crowd => "crowd",
            ScenarioId::Teardown => "teardown",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Handoff => "Vehicle B scans a walker, vehicle A 500 units away receives it flagged as relayed",
            ScenarioId::OutOfRange => "Vehicles 1500 units apart with radius 1000, no knowledge crosses the gap",
            ScenarioId::Convoy => "A moving vehicle carries B's walker to C, which B never reaches",
            ScenarioId::Crowd => "Random fleet and wandering crowd, checks retention and relay invariants",
            ScenarioId::Teardown => "Vehicle removed mid-run, timers cancelled and peers stop reaching it",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "handoff" | "v2v-001" => Ok(ScenarioId::Handoff),
            "out_of_range" | "outofrange" | "v2v-002" => Ok(ScenarioId::OutOfRange),
            "convoy" | "v2v-003" => Ok(ScenarioId::Convoy),
            "crowd" | "v2v-004" => Ok(ScenarioId::Crowd),
            "teardown" | "v2v-005" => Ok(ScenarioId::Teardown),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
