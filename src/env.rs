/// Represents a Markov decision process, defining the dynamics of an environment
/// in which an agent can operate.
///
/// This base trait represents the common case of a discrete-time MDP with one agent.
pub trait Environment {
    /// A representation of the state of the environment to be passed to an agent
    type State;

    /// A representation of an action that an agent can take to affect the environment
    type Action;

    /// Pick an action uniformly among the ones currently available
    fn random_action(&self) -> Self::Action;

    /// Update the environment in response to an action taken by an agent, producing a new state and associated reward
    ///
    /// **Returns** `(next_state, reward)`, where `next_state` is `None` if the episode ended
    fn step(&mut self, action: Self::Action) -> (Option<Self::State>, f32);

    /// Reset the environment to an initial state
    ///
    /// **Returns** the state
    fn reset(&mut self) -> Self::State;
}

/// An environment whose legal actions depend on its current state
pub trait MaskedActionSpace: Environment {
    /// Per-dimension legality of every action
    type Mask;

    /// Get the legal actions for the current state
    ///
    /// Every action dimension must keep at least one legal entry, instead specify an action that represents doing nothing if necessary.
    fn action_mask(&self) -> Self::Mask;
}
