//! Buffer registry and ownership arbitration

use crate::config::HubConfig;
use crate::event::EventFd;
use crate::fence::Fence;
use crate::protocol::{BufferParams, Opcode, PersistentName, Reply, Request};
use crate::slice::{BufferId, SliceDescriptor};
use crate::slice_region::SliceRegion;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub(crate) type ChannelId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Unbound,
    Producer(BufferId),
    Consumer(BufferId),
}

struct ChannelSlot {
    role: Role,
    event: Arc<EventFd>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProducerState {
    Gained,
    Posted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumerState {
    /// Nothing posted for this consumer
    Idle,
    /// A post is waiting to be acquired
    Pending,
    Acquired,
    Released,
}

struct ConsumerSlot {
    state: ConsumerState,
    ignore: bool,
}

impl ConsumerSlot {
    /// Whether this consumer keeps the producer from gaining
    fn holds_buffer(&self) -> bool {
        !self.ignore && matches!(self.state, ConsumerState::Pending | ConsumerState::Acquired)
    }
}

/// Server-side state of one logical buffer
struct BufferCore {
    params: BufferParams,
    descriptors: Vec<SliceDescriptor>,
    /// Keeps the slice memory alive; unlinked when the buffer is reaped
    _regions: Vec<SliceRegion>,
    producer: Option<ChannelId>,
    /// Producer went away and the buffer is not persistent
    abandoned: bool,
    state: ProducerState,
    consumers: BTreeMap<ChannelId, ConsumerSlot>,
    post_fence: Fence,
    metadata: Vec<u8>,
    /// Fences of every consumer release since the last post
    release_fences: Vec<Fence>,
    persistent: Option<PersistentName>,
}

impl BufferCore {
    fn gain_ready(&self) -> bool {
        !self.consumers.values().any(ConsumerSlot::holds_buffer)
    }

    fn holders(&self) -> usize {
        self.consumers.values().filter(|c| c.holds_buffer()).count()
    }
}

fn signal(channels: &HashMap<ChannelId, ChannelSlot>, ch: ChannelId) {
    if let Some(slot) = channels.get(&ch) {
        if let Err(e) = slot.event.signal() {
            warn!(channel = ch, "failed to signal channel: {}", e);
        }
    }
}

fn clear(channels: &HashMap<ChannelId, ChannelSlot>, ch: ChannelId) {
    if let Some(slot) = channels.get(&ch) {
        if let Err(e) = slot.event.clear() {
            warn!(channel = ch, "failed to clear channel: {}", e);
        }
    }
}

fn validate(params: &BufferParams, config: &HubConfig) -> Result<()> {
    if params.width == 0 || params.height == 0 {
        return Err(Error::InvalidArgument(format!(
            "empty geometry {}x{}",
            params.width, params.height
        )));
    }
    if params.slice_count == 0 || params.slice_count > config.max_slice_count {
        return Err(Error::InvalidArgument(format!(
            "slice count {} outside 1..={}",
            params.slice_count, config.max_slice_count
        )));
    }
    if params.metadata_size > config.max_metadata_size {
        return Err(Error::InvalidArgument(format!(
            "metadata size {} exceeds {}",
            params.metadata_size, config.max_metadata_size
        )));
    }
    if params.width.checked_mul(params.format.bytes_per_pixel() as u32).is_none() {
        return Err(Error::InvalidArgument(format!("width {} overflows the stride", params.width)));
    }
    Ok(())
}

/// All buffers and channels of one hub
pub(crate) struct Registry {
    config: HubConfig,
    /// Distinguishes shared memory names of hubs living in one process
    instance: u32,
    next_buffer_id: u32,
    next_channel_id: ChannelId,
    channels: HashMap<ChannelId, ChannelSlot>,
    buffers: HashMap<BufferId, BufferCore>,
    names: HashMap<String, BufferId>,
}

impl Registry {
    pub(crate) fn new(config: HubConfig, instance: u32) -> Self {
        Self {
            config,
            instance,
            next_buffer_id: 1,
            next_channel_id: 1,
            channels: HashMap::new(),
            buffers: HashMap::new(),
            names: HashMap::new(),
        }
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub(crate) fn persistent_id(&self, name: &str) -> Option<BufferId> {
        self.names.get(name).copied()
    }

    fn add_channel(&mut self, role: Role) -> Result<(ChannelId, Arc<EventFd>)> {
        let event = Arc::new(EventFd::new()?);
        let id = self.next_channel_id;
        self.next_channel_id += 1;
        self.channels.insert(
            id,
            ChannelSlot {
                role,
                event: event.clone(),
            },
        );
        Ok((id, event))
    }

    /// Register a new, not yet bound client channel
    pub(crate) fn open_channel(&mut self) -> Result<(ChannelId, Arc<EventFd>)> {
        self.add_channel(Role::Unbound)
    }

    fn role(&self, ch: ChannelId) -> Result<Role> {
        self.channels
            .get(&ch)
            .map(|slot| slot.role)
            .ok_or_else(|| Error::Transport(format!("channel {} is closed", ch)))
    }

    fn bind(&mut self, ch: ChannelId, role: Role) {
        if let Some(slot) = self.channels.get_mut(&ch) {
            slot.role = role;
        }
    }

    fn expect_unbound(&self, ch: ChannelId) -> Result<()> {
        match self.role(ch)? {
            Role::Unbound => Ok(()),
            _ => Err(Error::InvalidState(format!("channel {} is already bound to a buffer", ch))),
        }
    }

    fn bound_buffer(&self, ch: ChannelId) -> Result<BufferId> {
        match self.role(ch)? {
            Role::Producer(id) | Role::Consumer(id) => Ok(id),
            Role::Unbound => Err(Error::InvalidState(format!("channel {} has no buffer", ch))),
        }
    }

    fn producer_of(&self, ch: ChannelId) -> Result<BufferId> {
        match self.role(ch)? {
            Role::Producer(id) => Ok(id),
            _ => Err(Error::InvalidState(format!("channel {} is not a producer", ch))),
        }
    }

    fn consumer_of(&self, ch: ChannelId) -> Result<BufferId> {
        match self.role(ch)? {
            Role::Consumer(id) => Ok(id),
            _ => Err(Error::InvalidState(format!("channel {} is not a consumer", ch))),
        }
    }

    fn core_mut(&mut self, id: BufferId) -> Result<&mut BufferCore> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))
    }

    /// Dispatch one synchronous call
    pub(crate) fn handle(&mut self, ch: ChannelId, request: Request) -> Result<Reply> {
        trace!(channel = ch, opcode = ?request.opcode(), "handling request");
        match request {
            Request::CreateBuffer(params) => self.create_buffer(ch, params, None).map(|_| Reply::Done),
            Request::CreatePersistentBuffer(name, params) => {
                self.create_persistent_buffer(ch, name, params).map(|_| Reply::Done)
            }
            Request::GetPersistentBuffer(name) => self.get_persistent_buffer(ch, &name).map(|_| Reply::Done),
            Request::GetBuffers => self.get_buffers(ch).map(Reply::Buffers),
            Request::NewConsumer => Err(Error::InvalidArgument(
                "new consumer channels are opened by the channel itself".to_string(),
            )),
            Request::ProducerMakePersistent(name) => self.make_persistent(ch, name).map(|_| Reply::Done),
            Request::ProducerRemovePersistence => self.remove_persistence(ch).map(|_| Reply::Done),
            Request::ProducerPost { fence, metadata } => self.post(ch, fence, metadata).map(|_| Reply::Done),
            Request::ProducerGain => self.gain(ch).map(Reply::Fence),
            Request::ConsumerAcquire { metadata_size } => self
                .acquire(ch, metadata_size)
                .map(|(fence, metadata)| Reply::Acquired { fence, metadata }),
            Request::ConsumerRelease { fence } => self.release(ch, fence).map(|_| Reply::Done),
            Request::ConsumerSetIgnore(ignore) => self.set_ignore(ch, ignore).map(|_| Reply::Done),
        }
    }

    /// Dispatch one one-way notification
    pub(crate) fn impulse(&mut self, ch: ChannelId, opcode: Opcode) -> Result<()> {
        trace!(channel = ch, ?opcode, "handling impulse");
        match opcode {
            Opcode::ProducerGain => self.gain(ch).map(|_| ()),
            Opcode::ConsumerRelease => self.release(ch, Fence::empty()),
            other => Err(Error::InvalidArgument(format!("{:?} cannot be sent as an impulse", other))),
        }
    }

    fn create_buffer(&mut self, ch: ChannelId, params: BufferParams, name: Option<PersistentName>) -> Result<BufferId> {
        self.expect_unbound(ch)?;
        validate(&params, &self.config)?;
        if self.buffers.len() >= self.config.max_buffers {
            return Err(Error::Busy(format!("hub is full ({} buffers)", self.config.max_buffers)));
        }

        let slice_count = u32::try_from(params.slice_count)
            .map_err(|_| Error::InvalidArgument(format!("slice count {} too large", params.slice_count)))?;

        let id = BufferId(self.next_buffer_id);
        let descriptors: Vec<SliceDescriptor> = (0..slice_count)
            .map(|index| SliceDescriptor {
                buffer_id: id,
                index,
                os_id: format!(
                    "/{}_{}_{}_{}_{}",
                    self.config.shm_prefix,
                    std::process::id(),
                    self.instance,
                    id,
                    index
                ),
                width: params.width,
                height: params.height,
                stride: params.stride(),
                format: params.format,
                usage: params.usage,
                metadata_size: params.metadata_size,
            })
            .collect();
        let regions = descriptors
            .iter()
            .map(SliceRegion::create)
            .collect::<Result<Vec<_>>>()?;
        self.next_buffer_id += 1;

        debug!(%id, ?params, persistent = ?name, "created buffer");
        if let Some(name) = &name {
            self.names.insert(name.name.clone(), id);
        }
        self.buffers.insert(
            id,
            BufferCore {
                params,
                descriptors,
                _regions: regions,
                producer: Some(ch),
                abandoned: false,
                state: ProducerState::Gained,
                consumers: BTreeMap::new(),
                post_fence: Fence::empty(),
                metadata: vec![0; params.metadata_size],
                release_fences: Vec::new(),
                persistent: name,
            },
        );
        self.bind(ch, Role::Producer(id));
        Ok(id)
    }

    fn create_persistent_buffer(&mut self, ch: ChannelId, name: PersistentName, params: BufferParams) -> Result<BufferId> {
        let Some(id) = self.persistent_id(&name.name) else {
            return self.create_buffer(ch, params, Some(name));
        };

        let core = self.core_mut(id)?;
        if let Some(owner) = &core.persistent {
            if owner.user != name.user || owner.group != name.group {
                return Err(Error::PermissionDenied(format!(
                    "buffer \"{}\" belongs to {}:{}",
                    name.name, owner.user, owner.group
                )));
            }
        }
        if core.params != params {
            return Err(Error::InvalidArgument(format!(
                "buffer \"{}\" exists with different parameters",
                name.name
            )));
        }
        self.attach_producer(ch, id)?;
        Ok(id)
    }

    fn get_persistent_buffer(&mut self, ch: ChannelId, name: &str) -> Result<BufferId> {
        let id = self
            .persistent_id(name)
            .ok_or_else(|| Error::NotFound(format!("no persistent buffer named \"{}\"", name)))?;
        self.attach_producer(ch, id)?;
        Ok(id)
    }

    fn attach_producer(&mut self, ch: ChannelId, id: BufferId) -> Result<()> {
        self.expect_unbound(ch)?;
        let core = self.core_mut(id)?;
        if core.producer.is_some() {
            return Err(Error::Busy(format!("buffer {} already has a producer", id)));
        }
        core.producer = Some(ch);
        core.abandoned = false;
        let ready = core.state == ProducerState::Posted && core.gain_ready();
        debug!(%id, channel = ch, "attached producer");

        self.bind(ch, Role::Producer(id));
        if ready {
            signal(&self.channels, ch);
        }
        Ok(())
    }

    fn get_buffers(&mut self, ch: ChannelId) -> Result<Vec<SliceDescriptor>> {
        let id = self.bound_buffer(ch)?;
        let core = self.core_mut(id)?;
        if core.abandoned {
            return Err(Error::PeerGone);
        }
        Ok(core.descriptors.clone())
    }

    /// Open a consumer channel on the buffer `ch` is bound to
    pub(crate) fn add_consumer(&mut self, ch: ChannelId) -> Result<(ChannelId, Arc<EventFd>)> {
        let id = self.bound_buffer(ch)?;
        let core = self.core_mut(id)?;
        if core.abandoned {
            return Err(Error::PeerGone);
        }
        let posted = core.state == ProducerState::Posted;

        let (consumer, event) = self.add_channel(Role::Consumer(id))?;
        let state = if posted {
            ConsumerState::Pending
        } else {
            ConsumerState::Idle
        };
        self.core_mut(id)?
            .consumers
            .insert(consumer, ConsumerSlot { state, ignore: false });
        if posted {
            signal(&self.channels, consumer);
        }
        debug!(%id, channel = consumer, ?state, "created consumer");
        Ok((consumer, event))
    }

    fn post(&mut self, ch: ChannelId, fence: Fence, metadata: Vec<u8>) -> Result<()> {
        let id = self.producer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if metadata.len() != core.params.metadata_size {
            return Err(Error::SizeMismatch {
                expected: core.params.metadata_size,
                actual: metadata.len(),
            });
        }
        if core.state != ProducerState::Gained {
            return Err(Error::InvalidState(format!("buffer {} is already posted", id)));
        }

        core.state = ProducerState::Posted;
        core.post_fence = fence;
        core.metadata = metadata;
        core.release_fences.clear();
        for (&consumer, slot) in core.consumers.iter_mut() {
            if !slot.ignore {
                slot.state = ConsumerState::Pending;
                signal(&self.channels, consumer);
            }
        }
        clear(&self.channels, ch);
        if core.gain_ready() {
            signal(&self.channels, ch);
        }
        debug!(%id, pending = core.holders(), "posted");
        Ok(())
    }

    fn gain(&mut self, ch: ChannelId) -> Result<Fence> {
        let id = self.producer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if core.state != ProducerState::Posted {
            return Err(Error::InvalidState(format!("buffer {} is already gained", id)));
        }
        if !core.gain_ready() {
            return Err(Error::Busy(format!(
                "buffer {} is still held by {} consumer(s)",
                id,
                core.holders()
            )));
        }

        core.state = ProducerState::Gained;
        core.post_fence = Fence::empty();
        for slot in core.consumers.values_mut() {
            slot.state = ConsumerState::Idle;
        }
        clear(&self.channels, ch);
        debug!(%id, "gained");
        Ok(Fence::merge(core.release_fences.drain(..)))
    }

    fn acquire(&mut self, ch: ChannelId, metadata_size: usize) -> Result<(Fence, Vec<u8>)> {
        let id = self.consumer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if core.abandoned {
            return Err(Error::PeerGone);
        }
        if metadata_size != core.params.metadata_size {
            return Err(Error::SizeMismatch {
                expected: core.params.metadata_size,
                actual: metadata_size,
            });
        }
        let slot = core
            .consumers
            .get_mut(&ch)
            .ok_or_else(|| Error::Transport(format!("channel {} is closed", ch)))?;
        if slot.state != ConsumerState::Pending {
            return Err(Error::InvalidState(format!("no post pending for consumer {}", ch)));
        }
        let fence = core.post_fence.duplicate()?;

        slot.state = ConsumerState::Acquired;
        clear(&self.channels, ch);
        trace!(%id, channel = ch, "acquired");
        Ok((fence, core.metadata.clone()))
    }

    fn release(&mut self, ch: ChannelId, fence: Fence) -> Result<()> {
        let id = self.consumer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if core.abandoned {
            return Err(Error::PeerGone);
        }
        let slot = core
            .consumers
            .get_mut(&ch)
            .ok_or_else(|| Error::Transport(format!("channel {} is closed", ch)))?;
        if slot.state != ConsumerState::Acquired {
            return Err(Error::InvalidState(format!("consumer {} has not acquired the buffer", ch)));
        }

        slot.state = ConsumerState::Released;
        if fence.is_valid() {
            core.release_fences.push(fence);
        }
        trace!(%id, channel = ch, "released");
        if core.gain_ready() {
            if let Some(producer) = core.producer {
                signal(&self.channels, producer);
            }
        }
        Ok(())
    }

    fn set_ignore(&mut self, ch: ChannelId, ignore: bool) -> Result<()> {
        let id = self.consumer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if core.abandoned {
            return Err(Error::PeerGone);
        }
        let slot = core
            .consumers
            .get_mut(&ch)
            .ok_or_else(|| Error::Transport(format!("channel {} is closed", ch)))?;

        slot.ignore = ignore;
        if ignore && matches!(slot.state, ConsumerState::Pending | ConsumerState::Acquired) {
            slot.state = ConsumerState::Idle;
            clear(&self.channels, ch);
        }
        debug!(%id, channel = ch, ignore, "set ignore");
        if core.state == ProducerState::Posted && core.gain_ready() {
            if let Some(producer) = core.producer {
                signal(&self.channels, producer);
            }
        }
        Ok(())
    }

    fn make_persistent(&mut self, ch: ChannelId, name: PersistentName) -> Result<()> {
        let id = self.producer_of(ch)?;
        if let Some(other) = self.persistent_id(&name.name) {
            if other != id {
                return Err(Error::AlreadyExists(format!(
                    "name \"{}\" is used by buffer {}",
                    name.name, other
                )));
            }
        }
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if let Some(old) = core.persistent.take() {
            self.names.remove(&old.name);
        }
        debug!(%id, name = %name.name, "made persistent");
        self.names.insert(name.name.clone(), id);
        core.persistent = Some(name);
        Ok(())
    }

    fn remove_persistence(&mut self, ch: ChannelId) -> Result<()> {
        let id = self.producer_of(ch)?;
        let core = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("buffer {}", id)))?;
        if let Some(old) = core.persistent.take() {
            debug!(%id, name = %old.name, "removed persistence");
            self.names.remove(&old.name);
        }
        Ok(())
    }

    /// Forget a channel; closing it implicitly gives up whatever it held
    pub(crate) fn close_channel(&mut self, ch: ChannelId) {
        let Some(slot) = self.channels.remove(&ch) else {
            return;
        };
        match slot.role {
            Role::Unbound => {}
            Role::Producer(id) => {
                if let Some(core) = self.buffers.get_mut(&id) {
                    core.producer = None;
                    if core.persistent.is_none() {
                        core.abandoned = true;
                        for &consumer in core.consumers.keys() {
                            signal(&self.channels, consumer);
                        }
                    }
                    debug!(%id, channel = ch, abandoned = core.abandoned, "producer detached");
                }
                self.reap(id);
            }
            Role::Consumer(id) => {
                if let Some(core) = self.buffers.get_mut(&id) {
                    core.consumers.remove(&ch);
                    if core.state == ProducerState::Posted && core.gain_ready() {
                        if let Some(producer) = core.producer {
                            signal(&self.channels, producer);
                        }
                    }
                    trace!(%id, channel = ch, "consumer detached");
                }
                self.reap(id);
            }
        }
    }

    /// Drop a buffer nobody can reach any more
    fn reap(&mut self, id: BufferId) {
        let unreachable = self
            .buffers
            .get(&id)
            .is_some_and(|core| core.producer.is_none() && core.persistent.is_none() && core.consumers.is_empty());
        if unreachable {
            debug!(%id, "reaping buffer");
            self.buffers.remove(&id);
        }
    }
}
