//! Worker pool for per-function passes.
//!
//! The incremental builder hands each completed function to this pool
//! so early passes run while later functions are still being
//! translated. Workers pull from a shared queue and never touch module
//! state; each function's arena is owned by exactly one worker at a
//! time. `finish` restores submission order so the output module stays
//! deterministic.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::ir::Function;

use super::{auto_drop, refinalize};

pub struct FunctionPassPool {
    tx: Option<Sender<(usize, Function)>>,
    results: Receiver<(usize, Function)>,
    workers: Vec<JoinHandle<()>>,
    submitted: usize,
}

fn early_passes(func: &mut Function) {
    refinalize::run(func);
    auto_drop::run(func);
    refinalize::run(func);
}

impl FunctionPassPool {
    pub fn new() -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8);
        let (tx, rx) = channel::<(usize, Function)>();
        let (done_tx, results) = channel();
        let rx = Arc::new(Mutex::new(rx));
        let mut workers = Vec::with_capacity(threads);
        for _ in 0..threads {
            let rx = Arc::clone(&rx);
            let done_tx = done_tx.clone();
            workers.push(std::thread::spawn(move || loop {
                let next = rx.lock().expect("pool queue poisoned").recv();
                match next {
                    Ok((seq, mut func)) => {
                        early_passes(&mut func);
                        if done_tx.send((seq, func)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }));
        }
        FunctionPassPool {
            tx: Some(tx),
            results,
            workers,
            submitted: 0,
        }
    }

    pub fn submit(&mut self, func: Function) {
        let seq = self.submitted;
        self.submitted += 1;
        self.tx
            .as_ref()
            .expect("pool already finished")
            .send((seq, func))
            .expect("pool workers gone");
    }

    /// Close the queue, wait for the workers, and return the functions
    /// in submission order.
    pub fn finish(mut self) -> Vec<Function> {
        drop(self.tx.take());
        for worker in self.workers.drain(..) {
            worker.join().expect("pool worker panicked");
        }
        let mut done: Vec<(usize, Function)> = self.results.try_iter().collect();
        done.sort_by_key(|(seq, _)| *seq);
        done.into_iter().map(|(_, func)| func).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expression, Literal, ValType};

    fn make_func(name: &str) -> Function {
        let mut func = Function::new(name);
        let call = func.arena.alloc(Expression::Call {
            target: "g".into(),
            operands: vec![],
            ty: ValType::I32,
        });
        let c = func.arena.const_(Literal::I32(0));
        let set = func.arena.set_local(0, c);
        let body = func.arena.alloc(Expression::Block {
            name: None,
            list: vec![call, set],
            ty: ValType::None,
        });
        func.body = Some(body);
        func
    }

    #[test]
    fn pool_preserves_submission_order_and_runs_passes() {
        let mut pool = FunctionPassPool::new();
        for i in 0..16 {
            pool.submit(make_func(&format!("f{}", i)));
        }
        let funcs = pool.finish();
        assert_eq!(funcs.len(), 16);
        for (i, func) in funcs.iter().enumerate() {
            assert_eq!(func.name, format!("f{}", i));
            // the unused call result was dropped by the early passes
            let Expression::Block { list, .. } = func.arena.get(func.body.unwrap()) else {
                panic!("body must stay a block");
            };
            assert!(matches!(func.arena.get(list[0]), Expression::Drop { .. }));
        }
    }

    #[test]
    fn empty_pool_finishes_cleanly() {
        let pool = FunctionPassPool::new();
        assert!(pool.finish().is_empty());
    }
}
