use super::{DrainReport, PoolError, SlotId, WorkerPool};
use crate::{
    config::{ConfigErrors, DistConfig, HostRegistry},
    executors::{Invocation, ProcessHandle, Transport},
    template::CommandTemplate,
};
use std::{
    cell::RefCell,
    collections::{BTreeSet, VecDeque},
    io,
    os::unix::process::ExitStatusExt,
    process::ExitStatus,
    rc::Rc,
    time::Duration,
};

/// Process that reports itself finished after a number of polls
struct FakeHandle {
    polls_left: usize,
    exit_code: i32,
}

impl FakeHandle {
    fn poll(&mut self) -> io::Result<Option<ExitStatus>> {
        if self.polls_left == 0 {
            Ok(Some(ExitStatus::from_raw(self.exit_code << 8)))
        } else {
            self.polls_left -= 1;
            Ok(None)
        }
    }
}

impl ProcessHandle for FakeHandle {
    fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.poll()
    }

    fn wait_for(&mut self, _timeout: Duration) -> io::Result<Option<ExitStatus>> {
        self.poll()
    }
}

#[derive(Default)]
struct FakeTransport {
    // per spawn lifetimes in polls, `default_lifetime` once exhausted
    lifetimes: RefCell<VecDeque<usize>>,
    default_lifetime: usize,
    exit_code: i32,
    unreachable: Option<String>,
    launched: Rc<RefCell<Vec<Invocation>>>,
}

impl Transport for FakeTransport {
    type Handle = FakeHandle;

    fn invocation(&self, host: &crate::config::HostConfig, command: Vec<String>) -> Invocation {
        let mut args = vec![format!("{}@{}", host.user_name, host.host_name)];
        args.extend(command);

        Invocation {
            program: "fake-rsh".into(),
            args,
        }
    }

    fn spawn(&self, invocation: &Invocation) -> io::Result<FakeHandle> {
        if let Some(ref host) = self.unreachable {
            if invocation.args[0].ends_with(&format!("@{host}")) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "host unreachable"));
            }
        }

        self.launched.borrow_mut().push(invocation.clone());

        Ok(FakeHandle {
            polls_left: self
                .lifetimes
                .borrow_mut()
                .pop_front()
                .unwrap_or(self.default_lifetime),
            exit_code: self.exit_code,
        })
    }
}

fn hosts(yaml_hosts: &[(&str, usize)]) -> HostRegistry {
    let mut yaml = String::from("default:\n  user_name: alice\nhosts:\n");
    for (name, slots) in yaml_hosts {
        yaml.push_str(&format!("- host_name: {name}\n  max_processes: {slots}\n"));
    }

    HostRegistry::from_config(DistConfig::parse(&yaml).unwrap()).unwrap()
}

fn template(tokens: &[&str], placeholder: Option<&str>) -> CommandTemplate {
    CommandTemplate::new(
        tokens.iter().map(|token| token.to_string()).collect(),
        placeholder.map(String::from),
    )
    .unwrap()
}

fn pool(registry: HostRegistry, transport: FakeTransport) -> WorkerPool<FakeTransport> {
    let mut pool = WorkerPool::new(registry, template(&["run"], None), transport, false).unwrap();
    pool.poll_interval = Duration::from_millis(1);
    pool
}

fn chunk(arguments: &[&str]) -> Vec<Vec<u8>> {
    arguments.iter().map(|argument| argument.as_bytes().to_vec()).collect()
}

fn slot(host_name: &str, number: usize) -> SlotId {
    SlotId {
        host_name: host_name.into(),
        number,
    }
}

/// every slot is either idle or running, exactly once
fn assert_accounted(pool: &WorkerPool<FakeTransport>) {
    let all: BTreeSet<_> = pool.idle.iter().chain(pool.running.keys()).collect();

    assert_eq!(pool.idle.len() + pool.running.len(), pool.capacity());
    assert_eq!(all.len(), pool.capacity());
}

#[test]
fn universe_is_sum_of_capacities_in_host_order() {
    let pool = pool(hosts(&[("beta", 2), ("alpha", 1)]), FakeTransport::default());

    assert_eq!(pool.capacity(), 3);
    assert_eq!(
        pool.idle.iter().cloned().collect::<Vec<_>>(),
        [slot("alpha", 1), slot("beta", 1), slot("beta", 2)]
    );
    assert_accounted(&pool);
}

#[test]
fn empty_registry_is_rejected() {
    let result = WorkerPool::new(
        HostRegistry::default(),
        template(&["run"], None),
        FakeTransport::default(),
        false,
    );

    assert!(matches!(result, Err(ConfigErrors::NoHosts)));
}

#[test]
fn every_slot_is_used_before_any_is_reused() {
    let transport = FakeTransport {
        default_lifetime: usize::MAX,
        ..Default::default()
    };
    let mut pool = pool(hosts(&[("alpha", 2), ("beta", 2)]), transport);

    let used: Vec<_> = (0..4)
        .map(|index| pool.submit(&chunk(&[index.to_string().as_str()])).unwrap())
        .collect();

    assert_eq!(
        used,
        [
            slot("alpha", 1),
            slot("alpha", 2),
            slot("beta", 1),
            slot("beta", 2)
        ]
    );
    assert!(pool.idle.is_empty());
    assert_accounted(&pool);
}

#[test]
fn saturated_submit_waits_for_the_first_exit() {
    let transport = FakeTransport {
        lifetimes: RefCell::new(VecDeque::from([100, 0])),
        ..Default::default()
    };
    let mut pool = pool(hosts(&[("a", 1), ("b", 1)]), transport);

    assert_eq!(pool.submit(&chunk(&["1"])).unwrap(), slot("a", 1));
    assert_eq!(pool.submit(&chunk(&["2"])).unwrap(), slot("b", 1));
    // a is still busy, b finished first
    assert_eq!(pool.submit(&chunk(&["3"])).unwrap(), slot("b", 1));
    assert_accounted(&pool);
}

#[test]
fn more_chunks_than_slots_complete() {
    let transport = FakeTransport {
        default_lifetime: 3,
        ..Default::default()
    };
    let launched = transport.launched.clone();
    let mut pool = pool(hosts(&[("node", 2)]), transport);

    for index in 0..7 {
        pool.submit(&chunk(&[index.to_string().as_str()])).unwrap();
        assert!(pool.running.len() <= 2);
        assert_accounted(&pool);
    }

    let report = pool.drain().unwrap();
    assert_eq!(report.spawned, 7);
    assert_eq!(report.failed, 0);

    // chunks are launched in read order
    let arguments: Vec<_> = launched
        .borrow()
        .iter()
        .map(|invocation| invocation.args[2].clone())
        .collect();
    assert_eq!(arguments, ["0", "1", "2", "3", "4", "5", "6"]);
}

#[test]
fn freed_slots_rotate_to_the_back() {
    let transport = FakeTransport {
        lifetimes: RefCell::new(VecDeque::from([0])),
        default_lifetime: usize::MAX,
        ..Default::default()
    };
    let mut pool = pool(hosts(&[("a", 1), ("b", 1)]), transport);

    assert_eq!(pool.submit(&chunk(&["1"])).unwrap(), slot("a", 1));
    let freed = pool.reclaim().unwrap();

    assert_eq!(freed, [slot("a", 1)]);
    // b has been idle longer than the slot freed just now
    assert_eq!(
        pool.idle.iter().cloned().collect::<Vec<_>>(),
        [slot("b", 1), slot("a", 1)]
    );
    assert_eq!(pool.submit(&chunk(&["2"])).unwrap(), slot("b", 1));
}

#[test]
fn placeholder_receives_joined_chunk() {
    let transport = FakeTransport::default();
    let launched = transport.launched.clone();
    let mut pool = WorkerPool::new(
        hosts(&[("node", 1)]),
        template(&["run", "--items", "X"], Some("X")),
        transport,
        true,
    )
    .unwrap();

    pool.submit(&chunk(&["a", "b"])).unwrap();

    assert_eq!(
        launched.borrow()[0].args,
        ["alice@node", "run", "--items", "a b"]
    );
}

#[test]
fn arguments_are_appended_without_placeholder() {
    let transport = FakeTransport::default();
    let launched = transport.launched.clone();
    let mut pool = pool(hosts(&[("node", 1)]), transport);

    pool.submit(&chunk(&["a", "b"])).unwrap();

    assert_eq!(launched.borrow()[0].args, ["alice@node", "run", "a", "b"]);
    assert_eq!(launched.borrow()[0].to_string(), "fake-rsh alice@node run a b");
}

#[test]
fn spawn_failure_is_fatal_and_keeps_the_slot() {
    let transport = FakeTransport {
        unreachable: Some("down".into()),
        ..Default::default()
    };
    let mut pool = pool(hosts(&[("down", 2)]), transport);

    let error = pool.submit(&chunk(&["a"])).unwrap_err();

    assert!(matches!(error, PoolError::Spawn { ref slot, .. } if *slot == self::slot("down", 1)));
    assert!(pool.running.is_empty());
    assert_eq!(pool.idle.front(), Some(&slot("down", 1)));
    assert_accounted(&pool);
}

#[test]
fn invalid_utf8_is_rejected_before_allocation() {
    let mut pool = pool(hosts(&[("node", 1)]), FakeTransport::default());

    let error = pool.submit(&[vec![0xff, 0xfe]]).unwrap_err();

    assert!(matches!(error, PoolError::Encoding(_)));
    assert!(pool.running.is_empty());
    assert_accounted(&pool);
}

#[test]
fn unsuccessful_exits_are_counted() {
    let transport = FakeTransport {
        default_lifetime: 1,
        exit_code: 3,
        ..Default::default()
    };
    let mut pool = pool(hosts(&[("node", 1)]), transport);

    for _ in 0..3 {
        pool.submit(&chunk(&["x"])).unwrap();
    }

    let report = pool.drain().unwrap();
    assert_eq!(report.spawned, 3);
    assert_eq!(report.failed, 3);
}

#[test]
fn drain_without_work_returns_immediately() {
    let pool = pool(hosts(&[("node", 4)]), FakeTransport::default());

    assert_eq!(pool.drain().unwrap(), DrainReport::default());
}

#[test]
#[should_panic(expected = "both idle and running")]
fn double_booked_slot_aborts() {
    let mut pool = pool(hosts(&[("node", 2)]), FakeTransport::default());
    let head = pool.idle.front().cloned().unwrap();
    pool.running.insert(
        head,
        FakeHandle {
            polls_left: usize::MAX,
            exit_code: 0,
        },
    );

    let _ = pool.submit(&chunk(&["a"]));
}
