//! Program node: interprets a TIS-100-style assembly program.
//!
//! A single step-loop worker owns the interpreter core (ACC, BAK, PTR,
//! program); the RPC surface runs concurrently and touches only the
//! mailboxes, the running flag and the cancellation token. Pause and
//! Reset fire the token first, forcing any in-flight blocking
//! instruction to abort and release the core before state is touched.

use crate::network::client;
use crate::network::rpc::{Reply, Request};
use crate::network::server::{self, NodeService};
use crate::nodes::errors::NodeError;
use crate::nodes::reply_from;
use crate::runtime::{CancelToken, Mailbox};
use crate::tis::{Instr, LocalDst, MovDst, NetRef, Program, Src};
use crate::types::wrapper_types::BoxFuture;
use crate::utils::log::Logger;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::time::sleep;

/// Backoff before re-attempting an instruction that failed on a
/// transport error, so a dead peer does not turn the step loop into a
/// busy spin.
const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Interpreter state owned by the step loop.
struct Core {
    acc: i32,
    bak: i32,
    ptr: usize,
    program: Program,
}

impl Core {
    fn new() -> Self {
        Self {
            acc: 0,
            bak: 0,
            ptr: 0,
            program: Program::default(),
        }
    }
}

/// A node executing one compiled program against four inbound mailboxes.
pub struct ProgramNode {
    master_addr: String,
    core: AsyncMutex<Core>,
    registers: [Mailbox; 4],
    running: AtomicBool,
    token: Mutex<CancelToken>,
    /// Edge-triggered park signal; Run delivers a single wakeup and
    /// duplicates are dropped.
    run_signal: Notify,
    log: Logger,
}

impl ProgramNode {
    /// Creates a stopped program node identified by `address`, wired to
    /// the master at `master_addr`.
    pub fn new(address: &str, master_addr: &str) -> Arc<Self> {
        Arc::new(Self {
            master_addr: master_addr.to_string(),
            core: AsyncMutex::new(Core::new()),
            registers: [
                Mailbox::new(),
                Mailbox::new(),
                Mailbox::new(),
                Mailbox::new(),
            ],
            running: AtomicBool::new(false),
            token: Mutex::new(CancelToken::new()),
            run_signal: Notify::new(),
            log: Logger::new(address),
        })
    }

    /// Spawns the step-loop worker and starts serving RPCs on `listener`.
    pub fn start(self: &Arc<Self>, listener: TcpListener) {
        let node = self.clone();
        tokio::spawn(async move {
            node.step_loop().await;
        });

        let service: Arc<dyn NodeService> = self.clone();
        tokio::spawn(server::serve(listener, service, self.log.clone()));
    }

    /// Starts execution: installs a fresh token and wakes the step loop.
    /// Idempotent on a running node.
    pub fn run(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            *self.lock_token() = CancelToken::new();
            self.run_signal.notify_one();
            self.log.info("node was run");
        } else {
            self.log.info("node is already running");
        }
    }

    /// Stops execution, aborting any blocked instruction. ACC, BAK, PTR
    /// and mailbox contents are preserved. Idempotent on a stopped node.
    pub fn pause(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.replace_token();
            self.log.info("node was paused");
        } else {
            self.log.info("node is already paused");
        }
    }

    /// Pause plus zeroing ACC/BAK/PTR and re-creating empty mailboxes.
    /// The loaded program is retained.
    pub async fn reset(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.replace_token();

        let mut core = self.core.lock().await;
        core.acc = 0;
        core.bak = 0;
        core.ptr = 0;
        drop(core);

        for mailbox in &self.registers {
            mailbox.reset();
        }
        self.log.info("node was reset");
    }

    /// Resets the node, then parses and installs a new program.
    ///
    /// The reset happens before parsing, so a rejected program still
    /// leaves the node cleanly reset.
    pub async fn load(&self, source: &str) -> Result<(), NodeError> {
        self.reset().await;
        let program = Program::parse(source)?;

        let mut core = self.core.lock().await;
        core.program = program;
        drop(core);

        self.log.info("program was loaded");
        Ok(())
    }

    /// Deposits a value into mailbox `register`, completing only once the
    /// mailbox accepts it (rendezvous with the step loop).
    pub async fn send(&self, register: u8, value: i32) -> Result<(), NodeError> {
        let mailbox = self
            .registers
            .get(register as usize)
            .ok_or(NodeError::InvalidRegister(register))?;

        let token = self.current_token();
        mailbox.put(value, &token).await?;
        self.log.info("received value");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn current_token(&self) -> CancelToken {
        self.lock_token().clone()
    }

    fn replace_token(&self) {
        let mut token = self.lock_token();
        token.fire();
        *token = CancelToken::new();
    }

    fn lock_token(&self) -> MutexGuard<'_, CancelToken> {
        self.token.lock().expect("token lock poisoned")
    }

    /// Fetch/decode/step worker. Parks on the run signal while stopped;
    /// a cancelled instruction parks without advancing PTR, so the same
    /// instruction is re-attempted on the next Run.
    async fn step_loop(&self) {
        loop {
            self.run_signal.notified().await;
            loop {
                // Token before flag: if a Pause lands in between, the
                // token in hand is the fired one and the step aborts.
                let token = self.current_token();
                if !self.is_running() {
                    break;
                }
                match self.step(&token).await {
                    Ok(()) => {}
                    Err(NodeError::Cancelled) => {
                        self.log.info("step cancelled");
                        break;
                    }
                    Err(e) => {
                        self.log.warn(&format!("step failed: {e}"));
                        sleep(RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    /// Executes exactly one instruction and advances PTR.
    ///
    /// Jump instructions set PTR themselves and return early; all other
    /// instructions fall through to the advance, which wraps past the
    /// last instruction back to 0.
    async fn step(&self, token: &CancelToken) -> Result<(), NodeError> {
        let mut core = self.core.lock().await;
        let instr = core.program.instr(core.ptr).clone();

        match instr {
            Instr::Nop => {}
            Instr::Mov { src, dst } => {
                let value = self.read_src(&core, &src, token).await?;
                match dst {
                    MovDst::Local(dst) => write_local(&mut core, dst, value),
                    MovDst::Net(target) => self.send_remote(&target, value, token).await?,
                }
            }
            Instr::Swp => {
                let acc = core.acc;
                core.acc = core.bak;
                core.bak = acc;
            }
            Instr::Sav => core.bak = core.acc,
            Instr::Add(src) => {
                let value = self.read_src(&core, &src, token).await?;
                core.acc = core.acc.wrapping_add(value);
            }
            Instr::Sub(src) => {
                let value = self.read_src(&core, &src, token).await?;
                core.acc = core.acc.wrapping_sub(value);
            }
            Instr::Neg => core.acc = core.acc.wrapping_neg(),
            Instr::Jmp(target) => {
                core.ptr = target;
                return Ok(());
            }
            Instr::Jez(target) => {
                if core.acc == 0 {
                    core.ptr = target;
                    return Ok(());
                }
            }
            Instr::Jnz(target) => {
                if core.acc != 0 {
                    core.ptr = target;
                    return Ok(());
                }
            }
            Instr::Jgz(target) => {
                if core.acc > 0 {
                    core.ptr = target;
                    return Ok(());
                }
            }
            Instr::Jlz(target) => {
                if core.acc < 0 {
                    core.ptr = target;
                    return Ok(());
                }
            }
            Instr::Jro(src) => {
                let value = self.read_src(&core, &src, token).await?;
                let last = core.program.len() as i64 - 1;
                let target = (core.ptr as i64 + value as i64).clamp(0, last);
                core.ptr = target as usize;
                return Ok(());
            }
            Instr::Push { src, stack } => {
                let value = self.read_src(&core, &src, token).await?;
                client::call_ok(&stack, &Request::Push { value }, token).await?;
            }
            Instr::Pop { stack, dst } => {
                let value = client::call_value(&stack, &Request::Pop, token).await?;
                write_local(&mut core, dst, value);
            }
            Instr::In(dst) => {
                let value =
                    client::call_value(&self.master_addr, &Request::GetInput, token).await?;
                write_local(&mut core, dst, value);
            }
            Instr::Out(src) => {
                let value = self.read_src(&core, &src, token).await?;
                client::call_ok(&self.master_addr, &Request::SendOutput { value }, token).await?;
            }
        }

        core.ptr = (core.ptr + 1) % core.program.len();
        Ok(())
    }

    /// Resolves a value source. Reading a mailbox takes its value and
    /// blocks while it is empty.
    async fn read_src(&self, core: &Core, src: &Src, token: &CancelToken) -> Result<i32, NodeError> {
        match src {
            Src::Imm(v) => Ok(*v),
            Src::Acc => Ok(core.acc),
            Src::Nil => Ok(0),
            Src::Reg(r) => Ok(self.registers[*r as usize].take(token).await?),
        }
    }

    /// Delivers a value to a peer node's mailbox; completes only after
    /// the peer has accepted it.
    async fn send_remote(
        &self,
        target: &NetRef,
        value: i32,
        token: &CancelToken,
    ) -> Result<(), NodeError> {
        client::call_ok(
            &target.addr,
            &Request::Send {
                register: target.register,
                value,
            },
            token,
        )
        .await?;
        Ok(())
    }

    #[cfg(test)]
    async fn snapshot(&self) -> (i32, i32, usize) {
        let core = self.core.lock().await;
        (core.acc, core.bak, core.ptr)
    }

    #[cfg(test)]
    async fn step_once(&self) -> Result<(), NodeError> {
        let token = self.current_token();
        self.step(&token).await
    }
}

fn write_local(core: &mut Core, dst: LocalDst, value: i32) {
    match dst {
        LocalDst::Acc => core.acc = value,
        LocalDst::Nil => {}
    }
}

impl NodeService for ProgramNode {
    fn handle(self: Arc<Self>, request: Request) -> BoxFuture<'static, Reply> {
        Box::pin(async move {
            match request {
                Request::Run => {
                    self.run();
                    Reply::Ok
                }
                Request::Pause => {
                    self.pause();
                    Reply::Ok
                }
                Request::Reset => {
                    self.reset().await;
                    Reply::Ok
                }
                Request::Load { program } => reply_from(self.load(&program).await),
                Request::Send { register, value } => reply_from(self.send(register, value).await),
                _ => Reply::Err {
                    message: "operation not supported by a program node".to_string(),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn node() -> Arc<ProgramNode> {
        // No master involved in these tests; the address is never dialed.
        ProgramNode::new("p", "127.0.0.1:1")
    }

    #[tokio::test]
    async fn arithmetic_and_backup_registers() {
        let node = node();
        node.load("ADD 5\nSUB 2\nSAV\nNEG\nSWP").await.unwrap();

        node.step_once().await.unwrap(); // ACC = 5
        node.step_once().await.unwrap(); // ACC = 3
        node.step_once().await.unwrap(); // BAK = 3
        node.step_once().await.unwrap(); // ACC = -3
        assert_eq!(node.snapshot().await, (-3, 3, 4));

        node.step_once().await.unwrap(); // swap
        let (acc, bak, ptr) = node.snapshot().await;
        assert_eq!((acc, bak), (3, -3));
        // Fall-through past the last instruction wraps PTR to 0.
        assert_eq!(ptr, 0);
    }

    #[tokio::test]
    async fn mov_immediate_and_nil() {
        let node = node();
        node.load("MOV 7, ACC\nMOV 9, NIL\nADD NIL").await.unwrap();

        node.step_once().await.unwrap();
        node.step_once().await.unwrap(); // write to NIL is discarded
        node.step_once().await.unwrap(); // reading NIL yields 0
        assert_eq!(node.snapshot().await, (7, 0, 0));
    }

    #[tokio::test]
    async fn conditional_jumps_on_acc() {
        let node = node();
        node.load("TOP: JEZ HIT\nNOP\nHIT: NOP\nJMP TOP").await.unwrap();

        // ACC == 0: JEZ taken, PTR set to the label index directly.
        node.step_once().await.unwrap();
        assert_eq!(node.snapshot().await.2, 2);

        node.step_once().await.unwrap(); // HIT: NOP
        node.step_once().await.unwrap(); // JMP TOP
        assert_eq!(node.snapshot().await.2, 0);
    }

    #[tokio::test]
    async fn conditional_jump_falls_through_when_condition_fails() {
        let node = node();
        node.load("MOV 1, ACC\nJEZ END\nNOP\nEND: NOP").await.unwrap();

        node.step_once().await.unwrap();
        node.step_once().await.unwrap(); // ACC != 0: fall through
        assert_eq!(node.snapshot().await.2, 2);
    }

    #[tokio::test]
    async fn jro_clamps_to_program_bounds() {
        let node = node();
        node.load("JRO -10\nNOP\nNOP").await.unwrap();

        // Negative overshoot clamps to 0; JRO does not advance further.
        node.step_once().await.unwrap();
        assert_eq!(node.snapshot().await.2, 0);

        node.load("JRO 100\nNOP\nNOP").await.unwrap();
        node.step_once().await.unwrap();
        assert_eq!(node.snapshot().await.2, 2);
    }

    #[tokio::test]
    async fn jro_offsets_without_extra_advance() {
        let node = node();
        node.load("JRO 2\nNOP\nNOP\nNOP").await.unwrap();

        node.step_once().await.unwrap();
        assert_eq!(node.snapshot().await.2, 2);
    }

    #[tokio::test]
    async fn mailbox_read_takes_delivered_value() {
        let node = node();
        node.load("MOV R2, ACC").await.unwrap();

        node.send(2, 55).await.unwrap();
        node.step_once().await.unwrap();
        assert_eq!(node.snapshot().await.0, 55);
    }

    #[tokio::test]
    async fn mailbox_read_blocks_until_send() {
        let node = node();
        node.load("MOV R0, ACC").await.unwrap();

        let stepper = {
            let node = node.clone();
            tokio::spawn(async move { node.step_once().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stepper.is_finished());

        node.send(0, -4).await.unwrap();
        timeout(Duration::from_secs(1), stepper)
            .await
            .expect("blocked read did not resume")
            .unwrap()
            .unwrap();
        assert_eq!(node.snapshot().await.0, -4);
    }

    #[tokio::test]
    async fn cancelled_read_does_not_advance_ptr() {
        let node = node();
        node.load("MOV R0, ACC").await.unwrap();
        node.run();

        let stepper = {
            let node = node.clone();
            tokio::spawn(async move { node.step_once().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        node.pause();

        let result = timeout(Duration::from_secs(1), stepper)
            .await
            .expect("cancelled step did not resume")
            .unwrap();
        assert!(matches!(result, Err(NodeError::Cancelled)));
        assert_eq!(node.snapshot().await.2, 0);
    }

    #[tokio::test]
    async fn reset_zeroes_state_and_clears_mailboxes() {
        let node = node();
        node.load("ADD 3\nSAV").await.unwrap();
        node.step_once().await.unwrap();
        node.step_once().await.unwrap();
        node.send(1, 10).await.unwrap();

        node.reset().await;
        assert_eq!(node.snapshot().await, (0, 0, 0));

        // No stale mailbox value survives: the read blocks again.
        node.load("MOV R1, ACC").await.unwrap();
        let stepper = {
            let node = node.clone();
            tokio::spawn(async move { node.step_once().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!stepper.is_finished());
        stepper.abort();
    }

    #[tokio::test]
    async fn two_resets_leave_identical_state() {
        let node = node();
        node.load("ADD 1").await.unwrap();
        node.step_once().await.unwrap();

        node.reset().await;
        let first = node.snapshot().await;
        node.reset().await;
        let second = node.snapshot().await;
        assert_eq!(first, second);
        assert_eq!(first, (0, 0, 0));
    }

    #[tokio::test]
    async fn send_to_invalid_register_is_rejected() {
        let node = node();
        let err = node.send(4, 1).await.unwrap_err();
        assert!(matches!(err, NodeError::InvalidRegister(4)));
    }

    #[tokio::test]
    async fn load_failure_still_resets() {
        let node = node();
        node.load("ADD 3").await.unwrap();
        node.step_once().await.unwrap();

        let err = node.load("JMP NOWHERE").await.unwrap_err();
        assert!(matches!(err, NodeError::Asm(_)));
        // The implicit reset ran before parsing failed.
        assert_eq!(node.snapshot().await, (0, 0, 0));
    }

    #[tokio::test]
    async fn rendezvous_backpressure_on_send() {
        let node = node();
        node.load("TOP: MOV R3, ACC\nJMP TOP").await.unwrap();

        node.send(3, 1).await.unwrap();

        // Second send must block until the step loop consumes the first.
        let sender = {
            let node = node.clone();
            tokio::spawn(async move { node.send(3, 2).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        node.step_once().await.unwrap();
        timeout(Duration::from_secs(1), sender)
            .await
            .expect("blocked send did not resume")
            .unwrap()
            .unwrap();
        assert_eq!(node.snapshot().await.0, 1);
    }
}
