use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    GetAllSceneData,
    GetAllObjects,
    GetObjects,
    AddObject,
    UpdateObject,
    DeleteObject,
    SelectObject,
    SetBackground,
    DropIt,
    PlaceOnFloor,
    SetCameraTransform,
    GetCameraTransform,
    MoveCamera,
    ResetCamera,
    SetCameraLayer,
    ZoomCamera,
    SetGizmoMode,
    ModelLoaded,
    UpdateScene,
    GenerateMedia,
    GetLoadProgress,
}

impl Action {
    pub const ALL: [Action; 21] = [
        Action::GetAllSceneData,
        Action::GetAllObjects,
        Action::GetObjects,
        Action::AddObject,
        Action::UpdateObject,
        Action::DeleteObject,
        Action::SelectObject,
        Action::SetBackground,
        Action::DropIt,
        Action::PlaceOnFloor,
        Action::SetCameraTransform,
        Action::GetCameraTransform,
        Action::MoveCamera,
        Action::ResetCamera,
        Action::SetCameraLayer,
        Action::ZoomCamera,
        Action::SetGizmoMode,
        Action::ModelLoaded,
        Action::UpdateScene,
        Action::GenerateMedia,
        Action::GetLoadProgress,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Action::GetAllSceneData => "GET_ALL_SCENE_DATA",
            Action::GetAllObjects => "GET_ALL_OBJECTS",
            Action::GetObjects => "GET_OBJECTS",
            Action::AddObject => "ADD_OBJECT",
            Action::UpdateObject => "UPDATE_OBJECT",
            Action::DeleteObject => "DELETE_OBJECT",
            Action::SelectObject => "SELECT_OBJECT",
            Action::SetBackground => "SET_BACKGROUND",
            Action::DropIt => "DROP_IT",
            Action::PlaceOnFloor => "PLACE_ON_FLOOR",
            Action::SetCameraTransform => "SET_CAMERA_TRANSFORM",
            Action::GetCameraTransform => "GET_CAMERA_TRANSFORM",
            Action::MoveCamera => "MOVE_CAMERA",
            Action::ResetCamera => "RESET_CAMERA",
            Action::SetCameraLayer => "SET_CAMERA_LAYER",
            Action::ZoomCamera => "ZOOM_CAMERA",
            Action::SetGizmoMode => "SET_GIZMO_MODE",
            Action::ModelLoaded => "MODEL_LOADED",
            Action::UpdateScene => "UPDATE_SCENE",
            Action::GenerateMedia => "GENERATE_MEDIA",
            Action::GetLoadProgress => "GET_LOAD_PROGRESS",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|action| action.name() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Listener = Box<dyn FnMut(&Value)>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    by_action: HashMap<String, Vec<(u64, Rc<RefCell<Listener>>)>>,
}

/// Per-action listener lists, keyed by action name so unknown actions can be observed too.
#[derive(Clone, Default)]
pub struct Subscribers {
    table: Rc<RefCell<ListenerTable>>,
}

impl Subscribers {
    pub fn subscribe(&self, action: &str, listener: impl FnMut(&Value) + 'static) -> Subscription {
        let mut table = self.table.borrow_mut();
        let id = table.next_id;
        table.next_id += 1;
        let listener: Listener = Box::new(listener);
        table.by_action.entry(action.to_string()).or_default().push((id, Rc::new(RefCell::new(listener))));
        Subscription { table: Rc::downgrade(&self.table), action: action.to_string(), id }
    }

    pub fn count(&self, action: &str) -> usize {
        self.table.borrow().by_action.get(action).map_or(0, Vec::len)
    }

    /// Calls every listener for `action` in registration order. The list is snapshotted
    /// first, so listeners may subscribe or unsubscribe while being notified.
    pub fn notify(&self, action: &str, payload: &Value) {
        let snapshot: Vec<Rc<RefCell<Listener>>> = match self.table.borrow().by_action.get(action) {
            Some(listeners) => listeners.iter().map(|(_, listener)| Rc::clone(listener)).collect(),
            None => return,
        };
        for listener in snapshot {
            match listener.try_borrow_mut() {
                Ok(mut callback) => (*callback)(payload),
                Err(_) => tracing::warn!(target: "stage", action, "skipping re-entrant listener"),
            }
        }
    }
}

/// Handle returned by [`Subscribers::subscribe`]. Dropping it keeps the listener alive.
#[derive(Debug)]
pub struct Subscription {
    table: Weak<RefCell<ListenerTable>>,
    action: String,
    id: u64,
}

impl Subscription {
    /// Removes the listener. Safe to call any number of times.
    pub fn unsubscribe(&self) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };
        let mut table = table.borrow_mut();
        let Some(listeners) = table.by_action.get_mut(&self.action) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        before != listeners.len()
    }
}
