use serenity::model::id::UserId;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Comandos que un miembro sin permisos solo puede ejecutar por votación.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteCommand {
    Pause,
    Resume,
    Stop,
    Shuffle,
    Skip,
    Repeat,
}

impl VoteCommand {
    pub const ALL: [VoteCommand; 6] = [
        VoteCommand::Pause,
        VoteCommand::Resume,
        VoteCommand::Stop,
        VoteCommand::Shuffle,
        VoteCommand::Skip,
        VoteCommand::Repeat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            VoteCommand::Pause => "pause",
            VoteCommand::Resume => "resume",
            VoteCommand::Stop => "stop",
            VoteCommand::Shuffle => "shuffle",
            VoteCommand::Skip => "skip",
            VoteCommand::Repeat => "repeat",
        }
    }
}

impl fmt::Display for VoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Resultado de registrar un voto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    AlreadyVoted { remaining: usize },
    Recorded { remaining: usize },
    /// Quórum alcanzado (o aprobado automáticamente); el set del comando ya se limpió.
    Passed,
}

/// Votos necesarios para `command` con `members` miembros humanos en el canal de voz.
///
/// `None` significa aprobación automática: hay menos de 3 votantes además
/// del que invoca y el comando no es `stop`.
pub fn required_votes(command: VoteCommand, members: usize) -> Option<usize> {
    let eligible = members.saturating_sub(1);

    if eligible < 3 && command != VoteCommand::Stop {
        return None;
    }

    if command == VoteCommand::Stop && eligible == 2 {
        return Some(2);
    }

    // ceil(eligible / 2.5) sin flotantes
    Some((eligible * 2).div_ceil(5))
}

/// Votantes por comando. Vive dentro de la sesión y nunca se persiste.
#[derive(Debug, Default)]
pub struct VoteLedger {
    votes: HashMap<VoteCommand, HashSet<UserId>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_vote(
        &mut self,
        command: VoteCommand,
        voter: UserId,
        members: usize,
    ) -> VoteOutcome {
        let required = required_votes(command, members);
        let voters = self.votes.entry(command).or_default();

        if voters.contains(&voter) {
            let remaining = required.map_or(0, |r| r.saturating_sub(voters.len()));
            return VoteOutcome::AlreadyVoted { remaining };
        }

        let Some(required) = required else {
            // Solo se limpia el comando votado, los demás conservan sus votos.
            voters.clear();
            debug!("🗳️ {} aprobado automáticamente ({} miembros)", command, members);
            return VoteOutcome::Passed;
        };

        voters.insert(voter);
        if voters.len() >= required {
            voters.clear();
            debug!("🗳️ Votación de {} aprobada", command);
            VoteOutcome::Passed
        } else {
            VoteOutcome::Recorded {
                remaining: required - voters.len(),
            }
        }
    }

    pub fn count(&self, command: VoteCommand) -> usize {
        self.votes.get(&command).map_or(0, HashSet::len)
    }

    /// Limpia todos los comandos: se llama en cada avance de track.
    pub fn reset_all(&mut self) {
        for voters in self.votes.values_mut() {
            voters.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: u64) -> UserId {
        UserId::new(id)
    }

    #[test]
    fn small_channels_auto_pass_everything_but_stop() {
        for members in [2, 3] {
            for command in VoteCommand::ALL {
                if command == VoteCommand::Stop {
                    continue;
                }
                assert_eq!(required_votes(command, members), None);
            }
        }
    }

    #[test]
    fn stop_with_two_other_members_needs_two_votes() {
        assert_eq!(required_votes(VoteCommand::Stop, 3), Some(2));

        let mut ledger = VoteLedger::new();
        assert_eq!(
            ledger.register_vote(VoteCommand::Stop, user(1), 3),
            VoteOutcome::Recorded { remaining: 1 }
        );
        assert_eq!(ledger.register_vote(VoteCommand::Stop, user(2), 3), VoteOutcome::Passed);
        assert_eq!(ledger.count(VoteCommand::Stop), 0);
    }

    #[test]
    fn larger_groups_use_the_general_formula() {
        assert_eq!(required_votes(VoteCommand::Skip, 11), Some(4));
        assert_eq!(required_votes(VoteCommand::Stop, 11), Some(4));
        assert_eq!(required_votes(VoteCommand::Skip, 4), Some(2));
        // stop con un solo votante más no tiene caso especial
        assert_eq!(required_votes(VoteCommand::Stop, 2), Some(1));
    }

    #[test]
    fn revoting_never_increases_the_count() {
        let mut ledger = VoteLedger::new();
        assert_eq!(
            ledger.register_vote(VoteCommand::Skip, user(1), 11),
            VoteOutcome::Recorded { remaining: 3 }
        );
        for _ in 0..5 {
            assert_eq!(
                ledger.register_vote(VoteCommand::Skip, user(1), 11),
                VoteOutcome::AlreadyVoted { remaining: 3 }
            );
        }
        assert_eq!(ledger.count(VoteCommand::Skip), 1);
    }

    #[test]
    fn auto_pass_only_resets_the_voted_command() {
        let mut ledger = VoteLedger::new();
        ledger.register_vote(VoteCommand::Stop, user(1), 3);
        assert_eq!(ledger.register_vote(VoteCommand::Skip, user(2), 3), VoteOutcome::Passed);
        assert_eq!(ledger.count(VoteCommand::Stop), 1);
    }

    #[test]
    fn reset_all_clears_pending_votes() {
        let mut ledger = VoteLedger::new();
        ledger.register_vote(VoteCommand::Skip, user(1), 11);
        ledger.register_vote(VoteCommand::Pause, user(2), 11);
        ledger.register_vote(VoteCommand::Shuffle, user(3), 11);

        ledger.reset_all();

        for command in VoteCommand::ALL {
            assert_eq!(ledger.count(command), 0);
        }
    }
}
