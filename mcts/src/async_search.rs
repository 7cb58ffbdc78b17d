use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use log::error;

use engine::{EndgameOracle, GameRules};

use crate::options::SearchOptions;
use crate::tree::{SearchTree, TreeMode};

/// One ply of the line the worker decided on, with the move distribution it
/// was drawn from.
#[derive(Clone, Debug)]
pub struct ChosenMove<P> {
    pub position: P,
    pub distribution: Vec<f32>,
}

enum Request<P> {
    /// The opponent played this move: prune to the matching child.
    Played(P),
    /// Stop pondering, finish thinking under the wall-clock budget, and
    /// reply with the chosen line.
    Decide,
}

/// Runs a [`SearchTree`] inside a dedicated worker thread so the search
/// keeps thinking on the opponent's time. The worker owns the tree
/// exclusively; the only communication is the request/reply channel pair —
/// no shared memory, no locks.
///
/// A crashed worker surfaces as an error on the next call; decisions are
/// never retried internally.
pub struct AsyncSearch<P> {
    requests: Sender<Request<P>>,
    replies: Receiver<Vec<ChosenMove<P>>>,
    handle: JoinHandle<()>,
}

impl<P> AsyncSearch<P>
where
    P: Clone + Send + Sync + 'static,
{
    pub fn spawn<R, O>(
        rules: R,
        mode: TreeMode<R>,
        oracle: O,
        position: P,
        options: SearchOptions,
    ) -> Self
    where
        R: GameRules<Position = P> + Send + Sync + 'static,
        O: EndgameOracle<Position = P> + Send + 'static,
    {
        let (requests, request_rx) = channel::unbounded();
        let (reply_tx, replies) = channel::unbounded();

        let handle = thread::spawn(move || {
            if let Err(err) = worker_loop(rules, mode, oracle, position, options, request_rx, reply_tx)
            {
                error!("search worker terminated: {:#}", err);
            }
        });

        Self {
            requests,
            replies,
            handle,
        }
    }

    /// Tells the worker the opponent played this move; the search tree is
    /// pruned to the matching subtree.
    pub fn report_move(&self, position: P) -> Result<()> {
        self.requests
            .send(Request::Played(position))
            .map_err(|_| anyhow!("search worker is gone"))
    }

    /// Asks the worker to decide now. Blocks until the worker finishes
    /// thinking under its wall-clock budget and replies with the chosen
    /// line: one entry per ply played while it stayed this player's turn.
    pub fn decide(&self) -> Result<Vec<ChosenMove<P>>> {
        self.requests
            .send(Request::Decide)
            .map_err(|_| anyhow!("search worker is gone"))?;
        self.replies
            .recv()
            .map_err(|_| anyhow!("search worker crashed before answering"))
    }

    /// Shuts the worker down and waits for it to exit.
    pub fn terminate(self) {
        let Self {
            requests,
            replies,
            handle,
        } = self;
        drop(requests);
        drop(replies);
        let _ = handle.join();
    }
}

fn worker_loop<R, O>(
    rules: R,
    mode: TreeMode<R>,
    oracle: O,
    position: R::Position,
    options: SearchOptions,
    requests: Receiver<Request<R::Position>>,
    replies: Sender<Vec<ChosenMove<R::Position>>>,
) -> Result<()>
where
    R: GameRules + Sync,
    R::Position: Clone + Send + Sync,
    O: EndgameOracle<Position = R::Position>,
{
    let decide_budget = options.decide_budget;
    let mut tree = SearchTree::new(rules, mode, oracle, position, options)?;
    let mut rng = rand::thread_rng();

    loop {
        // ponder while the channel is quiet; block once the tree is proven
        let request = match tree.choose_expansion_node()? {
            Some(node) => {
                tree.expand(node)?;
                match requests.try_recv() {
                    Ok(request) => Some(request),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => return Ok(()),
                }
            }
            None => match requests.recv() {
                Ok(request) => Some(request),
                Err(_) => return Ok(()),
            },
        };

        let Some(request) = request else {
            continue;
        };

        match request {
            Request::Played(position) => {
                tree.advance_to(&position)?;
                if tree.root_is_terminal() {
                    return Ok(());
                }
            }
            Request::Decide => {
                let deadline = Instant::now() + decide_budget;
                while Instant::now() < deadline {
                    match tree.choose_expansion_node()? {
                        Some(node) => tree.expand(node)?,
                        None => break,
                    }
                }

                let line = tree.play_line(&mut rng)?;
                let line = line
                    .into_iter()
                    .map(|(position, distribution)| ChosenMove {
                        position,
                        distribution,
                    })
                    .collect();
                if replies.send(line).is_err() {
                    return Ok(());
                }
                if tree.root_is_terminal() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counting_game::{position, CountingRules};
    use engine::NullOracle;
    use std::time::Duration;

    fn quick_options() -> SearchOptions {
        SearchOptions {
            decide_budget: Duration::from_millis(50),
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_decide_returns_the_proven_line() {
        let search = AsyncSearch::spawn(
            CountingRules::new(10),
            TreeMode::Rollout,
            NullOracle::new(),
            position(true, 9),
            quick_options(),
        );

        let line = search.decide().unwrap();
        assert_eq!(line.len(), 1);
        assert_eq!(line[0].position, position(false, 10));
        assert_eq!(line[0].distribution[0], 1.0);

        search.terminate();
    }

    #[test]
    fn test_report_move_prunes_and_search_continues() {
        let search = AsyncSearch::spawn(
            CountingRules::new(10),
            TreeMode::Rollout,
            NullOracle::new(),
            position(true, 5),
            quick_options(),
        );

        search.report_move(position(false, 6)).unwrap();
        let line = search.decide().unwrap();
        assert_eq!(line.len(), 1);
        let next = &line[0].position;
        assert!(next.p1_turn);
        assert!([5, 6, 7].contains(&next.count));

        search.terminate();
    }

    #[test]
    fn test_worker_survives_until_terminated() {
        let search = AsyncSearch::spawn(
            CountingRules::new(10),
            TreeMode::Rollout,
            NullOracle::new(),
            position(true, 9),
            quick_options(),
        );

        // the first decide ends the game (9 -> 10 is terminal), after which
        // the worker exits; later calls report the worker as gone
        let line = search.decide().unwrap();
        assert_eq!(line[0].position, position(false, 10));

        // give the worker a moment to exit before poking it again
        std::thread::sleep(Duration::from_millis(20));
        assert!(search.decide().is_err());
    }
}
