use tauri::State;

use super::{err_str, AppState};
use crate::models::{AgentConfig, AgentEntry, Topic};
use crate::store::{CreatedTopic, ItemKind};

#[tauri::command]
pub async fn get_agents(state: State<'_, AppState>) -> Result<Vec<AgentEntry>, String> {
    let agents = state.store.list_agents().await.map_err(err_str)?;
    Ok(agents.into_iter().map(AgentEntry::from).collect())
}

#[tauri::command]
pub async fn get_agent_config(
    state: State<'_, AppState>,
    agent_id: String,
) -> Result<AgentEntry, String> {
    state
        .store
        .get_agent_config(&agent_id)
        .await
        .map(AgentEntry::from)
        .map_err(err_str)
}

#[tauri::command]
pub async fn save_agent_config(
    state: State<'_, AppState>,
    agent_id: String,
    mut config: AgentConfig,
) -> Result<(), String> {
    config.id = agent_id;
    state.store.save_agent_config(&config).await.map_err(err_str)
}

#[tauri::command]
pub async fn get_agent_topics(
    state: State<'_, AppState>,
    agent_id: String,
) -> Result<Vec<Topic>, String> {
    state.store.get_topics(&agent_id).await.map_err(err_str)
}

#[tauri::command]
pub async fn create_new_topic(
    state: State<'_, AppState>,
    agent_id: String,
    topic_name: Option<String>,
) -> Result<CreatedTopic, String> {
    state
        .store
        .create_topic(&agent_id, topic_name.as_deref())
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn delete_topic(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
) -> Result<Vec<Topic>, String> {
    state
        .store
        .delete_topic(&agent_id, &topic_id)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn save_topic_order(
    state: State<'_, AppState>,
    agent_id: String,
    ordered_topic_ids: Vec<String>,
) -> Result<Vec<Topic>, String> {
    state
        .store
        .reorder_topics(&agent_id, &ordered_topic_ids)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn save_group_topic_order(
    state: State<'_, AppState>,
    group_id: String,
    ordered_topic_ids: Vec<String>,
) -> Result<Vec<Topic>, String> {
    state
        .store
        .reorder_group_topics(&group_id, &ordered_topic_ids)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn save_agent_topic_title(
    state: State<'_, AppState>,
    agent_id: String,
    topic_id: String,
    new_title: String,
) -> Result<Vec<Topic>, String> {
    state
        .store
        .rename_topic(&agent_id, &topic_id, &new_title)
        .await
        .map_err(err_str)
}

#[tauri::command]
pub async fn search_topics_by_content(
    state: State<'_, AppState>,
    item_id: String,
    item_type: Option<ItemKind>,
    search_term: String,
) -> Result<Vec<String>, String> {
    state
        .store
        .search_topics_by_content(&item_id, item_type.unwrap_or_default(), &search_term)
        .await
        .map_err(err_str)
}
