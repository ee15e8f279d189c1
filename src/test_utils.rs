//! Test helpers for spinning up an in-process network on ephemeral ports.

pub mod utils {
    use crate::nodes::{Directory, MasterNode, NodeRole, ProgramNode, StackNode};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    /// A fully wired in-process network: one master plus the requested
    /// program and stack nodes, all serving RPCs on 127.0.0.1.
    pub struct TestNet {
        pub master: Arc<MasterNode>,
        pub master_addr: String,
        pub programs: Vec<(Arc<ProgramNode>, String)>,
        pub stacks: Vec<(Arc<StackNode>, String)>,
    }

    impl TestNet {
        /// Address of the n-th program node.
        pub fn program_addr(&self, n: usize) -> &str {
            &self.programs[n].1
        }

        /// Address of the n-th stack node.
        pub fn stack_addr(&self, n: usize) -> &str {
            &self.stacks[n].1
        }
    }

    async fn bind() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener
            .local_addr()
            .expect("listener has no local addr")
            .to_string();
        (listener, addr)
    }

    /// Binds listeners first so the directory is complete before any
    /// node starts serving, then starts everything.
    pub async fn spawn_network(n_programs: usize, n_stacks: usize) -> TestNet {
        let (master_listener, master_addr) = bind().await;

        let mut directory = Directory::new();
        let mut program_listeners = Vec::new();
        for _ in 0..n_programs {
            let (listener, addr) = bind().await;
            directory.insert(addr.clone(), NodeRole::Program);
            program_listeners.push((listener, addr));
        }

        let mut stack_listeners = Vec::new();
        for _ in 0..n_stacks {
            let (listener, addr) = bind().await;
            directory.insert(addr.clone(), NodeRole::Stack);
            stack_listeners.push((listener, addr));
        }

        let master = MasterNode::new(directory);
        master.start(master_listener);

        let programs = program_listeners
            .into_iter()
            .map(|(listener, addr)| {
                let node = ProgramNode::new(&addr, &master_addr);
                node.start(listener);
                (node, addr)
            })
            .collect();

        let stacks = stack_listeners
            .into_iter()
            .map(|(listener, addr)| {
                let node = StackNode::new(&addr);
                node.start(listener);
                (node, addr)
            })
            .collect();

        TestNet {
            master,
            master_addr,
            programs,
            stacks,
        }
    }
}
